use serde::{Deserialize, Serialize};

/// Host-application metadata handed to the global-surface installer when an
/// engine instance is created. The engine itself never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppInfo {
    pub version: String,
    pub name: String,
    pub application: String,
    pub application_version: String,
    pub locale: String,
    pub development_build: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_keys() {
        let info = AppInfo {
            version: "1.0".to_string(),
            name: "sieve".to_string(),
            application: "host".to_string(),
            application_version: "2.3".to_string(),
            locale: "en-US".to_string(),
            development_build: true,
        };
        let json = serde_json::to_value(&info).expect("serialize app info");
        assert_eq!(json["applicationVersion"], "2.3");
        assert_eq!(json["developmentBuild"], true);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let info: AppInfo = serde_json::from_str(r#"{"name":"sieve"}"#).expect("parse app info");
        assert_eq!(info.name, "sieve");
        assert_eq!(info.locale, "");
        assert!(!info.development_build);
    }
}
