use serde::Deserialize;
use serde::Serialize;

/// One interchangeable config-service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAddress {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub instance_id: String,
    pub homepage_url: String,
}

impl ServiceAddress {
    pub fn new(homepage_url: impl Into<String>) -> Self {
        let homepage_url = homepage_url.into();
        Self {
            app_name: "beacon-configservice".to_string(),
            instance_id: homepage_url.clone(),
            homepage_url,
        }
    }
}
