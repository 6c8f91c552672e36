//! Docker implementation of the container-engine port, over the local Unix
//! socket.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use futures::StreamExt as _;

use crate::container::{ContainerEngine, ContainerSpec, ContainerState, ProgressSink, RegistryAuth};
use crate::error::ContainerError;

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the engine on its default local socket.
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_unix_defaults()
            .map_err(|e| ContainerError::Engine(e.to_string()))?;

        Ok(DockerEngine { docker })
    }
}

fn engine_error(e: bollard::errors::Error) -> ContainerError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => ContainerError::NotFound(message),
        other => ContainerError::Engine(other.to_string()),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        progress: ProgressSink<'_>,
    ) -> Result<(), ContainerError> {
        let options = CreateImageOptions {
            from_image: image.to_owned(),
            ..Default::default()
        };
        let credentials = auth.map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            ..Default::default()
        });

        progress(format!("Pulling image: {image}"));

        let mut layers = 0u32;
        let mut complete = 0u32;

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| ContainerError::Pull(e.to_string()))?;

            // Lines with progress detail are the moving progress bars;
            // suppress them and forward the layer status changes.
            if info.progress_detail.is_some() {
                continue;
            }
            let (Some(status), Some(id)) = (info.status, info.id) else {
                continue;
            };

            match status.trim().to_lowercase().as_str() {
                "pulling fs layer" => layers += 1,
                "pull complete" => complete += 1,
                _ => {}
            }
            progress(format!("{status}: {id}"));
        }

        progress(format!("Finished pulling {complete} / {layers} layers"));

        Ok(())
    }

    async fn build(
        &self,
        tag: &str,
        dockerfile: &str,
        progress: ProgressSink<'_>,
    ) -> Result<(), ContainerError> {
        let options = BuildImageOptions {
            t: tag.to_owned(),
            rm: true,
            ..Default::default()
        };

        let tarball = dockerfile_tarball(dockerfile)
            .map_err(|e| ContainerError::Build(format!("could not pack build context: {e}")))?;

        let mut success = true;
        let mut stream = self
            .docker
            .build_image(options, None, Some(tarball.into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| ContainerError::Build(e.to_string()))?;

            if let Some(error) = info.error {
                progress(error);
                success = false;
            }
            if let Some(line) = info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    progress(line.to_owned());
                }
            }
        }

        if !success {
            return Err(ContainerError::Build(
                "check your Dockerfile for errors".to_owned(),
            ));
        }

        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|port| (port.to_string(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .port_bindings
            .iter()
            .map(|(port, host_port)| {
                (
                    port.to_string(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();

        // Chutes run on the default bridge with NET_ADMIN so they can manage
        // the interfaces we hand them; everything else stays locked down.
        let host_config = HostConfig {
            network_mode: Some("bridge".to_owned()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(5),
            }),
            cap_add: Some(vec!["NET_ADMIN".to_owned()]),
            binds: Some(spec.binds.clone()),
            dns: Some(spec.dns.clone()),
            port_bindings: Some(port_bindings),
            cpu_shares: spec.cpu_shares,
            memory: spec.memory,
            publish_all_ports: Some(false),
            privileged: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(engine_error)?;

        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error)
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(engine_error)
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), ContainerError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(engine_error)
    }

    async fn remove_image(&self, image: &str) -> Result<(), ContainerError> {
        self.docker
            .remove_image(image, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(engine_error)
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, ContainerError> {
        let response = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(engine_error)?;

        Ok(ContainerState {
            running: response
                .state
                .as_ref()
                .and_then(|state| state.running)
                .unwrap_or(false),
            ip_address: response
                .network_settings
                .and_then(|settings| settings.ip_address)
                .filter(|ip| !ip.is_empty()),
        })
    }
}

/// Packs a lone Dockerfile into the tar archive the build endpoint expects.
fn dockerfile_tarball(dockerfile: &str) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, dockerfile.as_bytes())?;

    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dockerfile_tarball_contains_the_dockerfile() {
        let tarball = dockerfile_tarball("FROM alpine\n").unwrap();

        let mut archive = tar::Archive::new(tarball.as_slice());
        let mut entries = archive.entries().unwrap();
        let entry = entries.next().unwrap().unwrap();

        assert_eq!(entry.path().unwrap().to_string_lossy(), "Dockerfile");
    }
}
