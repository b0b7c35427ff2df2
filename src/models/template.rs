use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::message::{EMPLOYEE_NAME_VAR, TEAM_NAME_VAR};

pub const DEFAULT_EMPLOYEE_NAME: &str = "Użytkownik";
pub const DEFAULT_TEAM_NAME: &str = "Twój nowy zespół";

/// Body of the "added to a new team" text message.
pub const TEAM_CHANGE_SMS_TEMPLATE: &str = "Witaj {{employee_name}},\n\n\
Z przyjemnością informujemy, że zostałeś/aś dodany/a do zespołu {{team_name}}.\n\n\
Współpracuj, twórz innowacje i wywieraj wpływ razem ze swoimi nowymi kolegami.\n\n\
Zespół Systemu Zarządzania Zespołami";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing variable in template: {0}")]
pub struct TemplateError(pub String);

/// Renders the team change text, falling back to generic wording for
/// missing names.
pub fn render_team_change_sms(template_data: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut variables = HashMap::new();

    for (key, fallback) in [
        (EMPLOYEE_NAME_VAR, DEFAULT_EMPLOYEE_NAME),
        (TEAM_NAME_VAR, DEFAULT_TEAM_NAME),
    ] {
        let value = template_data
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback);
        variables.insert(key.to_string(), value.to_string());
    }

    render(TEAM_CHANGE_SMS_TEMPLATE, &variables)
}

/// Replaces every `{{name}}` placeholder; any placeholder left over is an error.
pub fn render(template: &str, variables: &HashMap<String, String>) -> Result<String, TemplateError> {
    debug!(variable_count = variables.len(), "Rendering template");

    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    if let Some(start) = result.find("{{") {
        if let Some(len) = result[start..].find("}}") {
            let missing_var = &result[start..start + len + 2];

            warn!(
                missing_variable = %missing_var,
                "Template contains unreplaced variable"
            );

            return Err(TemplateError(missing_var.to_string()));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_names_into_sms_body() {
        let mut data = HashMap::new();
        data.insert("employee_name".to_string(), "Alice".to_string());
        data.insert("team_name".to_string(), "Platform".to_string());

        let body = render_team_change_sms(&data).unwrap();

        assert!(body.starts_with("Witaj Alice,"));
        assert!(body.contains("do zespołu Platform."));
    }

    #[test]
    fn falls_back_to_generic_names() {
        let body = render_team_change_sms(&HashMap::new()).unwrap();

        assert!(body.starts_with("Witaj Użytkownik,"));
        assert!(body.contains("Twój nowy zespół"));
    }

    #[test]
    fn reports_unreplaced_placeholder() {
        let err = render("Hi {{who}}", &HashMap::new()).unwrap_err();
        assert_eq!(err, TemplateError("{{who}}".to_string()));
    }
}
