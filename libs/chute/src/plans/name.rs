//! Name validation: runs before anything touches the host.

use crate::plan::{Action, phase};
use crate::update::Update;
use crate::{Error, Result};

const MAX_CHUTE_NAME_LEN: usize = 32;

pub(super) fn generate(update: &mut Update) -> Result<()> {
    update.plan.register(phase::VALIDATE_NAME, Action::ValidateName);
    Ok(())
}

pub(super) fn validate_name(update: &mut Update) -> Result<()> {
    let name = &update.name;

    if name.is_empty() {
        return Err(Error::validation("chute name must not be empty"));
    }
    if name.len() > MAX_CHUTE_NAME_LEN {
        return Err(Error::validation(format!(
            "chute name '{name}' is longer than {MAX_CHUTE_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(format!(
            "chute name '{name}' may only contain letters, digits, '-', and '_'"
        )));
    }

    if let Some(new) = &update.new {
        if new.name != *name {
            return Err(Error::validation(format!(
                "chute name '{}' does not match the update name '{name}'",
                new.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{UpdateRequest, UpdateType};
    use tokio::sync::oneshot;

    fn update(name: &str) -> Update {
        let request: UpdateRequest = serde_json::from_value(serde_json::json!({
            "updateClass": "CHUTE",
            "updateType": "create",
            "name": name,
        }))
        .unwrap();
        let (tx, _rx) = oneshot::channel();
        let mut update = Update::from_request(request, tx).unwrap();
        assert_eq!(update.update_type, UpdateType::Create);
        update.complete(true, "test", false);
        update
    }

    #[test]
    fn accepts_reasonable_names() {
        assert!(validate_name(&mut update("seismic-sensor_2")).is_ok());
    }

    #[test]
    fn rejects_empty_and_funny_names() {
        assert!(validate_name(&mut update("")).is_err());
        assert!(validate_name(&mut update("has space")).is_err());
        assert!(validate_name(&mut update("dot.dot")).is_err());
        assert!(validate_name(&mut update(&"x".repeat(33))).is_err());
    }
}
