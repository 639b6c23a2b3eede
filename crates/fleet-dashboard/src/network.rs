//! Organization and network wire types.

use serde::{Deserialize, Serialize};

/// An organization visible to the API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization id (numeric ids are normalized to strings)
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
}

/// A network in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network id
    pub id: String,
    /// Display name
    pub name: String,
    /// Owning organization
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub organization_id: Option<String>,
    /// Space-separated tags
    #[serde(default)]
    pub tags: Option<String>,
}

/// Request body for creating a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNetwork {
    /// Display name
    pub name: String,
    /// Space-separated product types
    #[serde(rename = "type")]
    pub network_type: String,
    /// Space-separated tags
    pub tags: String,
    /// IANA time zone
    pub time_zone: String,
    /// Template network to copy settings from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_from_network_id: Option<String>,
}

/// Request body for blinking a device's LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlinkRequest {
    /// Duration in seconds
    pub duration: u32,
    /// Period in milliseconds
    pub period: u32,
    /// Duty cycle percentage
    pub duty: u32,
}

impl Default for BlinkRequest {
    fn default() -> Self {
        Self {
            duration: 20,
            period: 160,
            duty: 50,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_organization_numeric_id() {
        let org: Organization =
            serde_json::from_value(json!({ "id": 549236, "name": "Demo" })).unwrap();
        assert_eq!(org.id, "549236");

        let org: Organization = serde_json::from_value(json!({ "id": "549236" })).unwrap();
        assert_eq!(org.id, "549236");
        assert_eq!(org.name, "");
    }

    #[test]
    fn test_new_network_body() {
        let body = NewNetwork {
            name: "San Jose - CA".to_string(),
            network_type: "appliance switch".to_string(),
            tags: "foo bar ham".to_string(),
            time_zone: "America/Los_Angeles".to_string(),
            copy_from_network_id: Some("L_100".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "name": "San Jose - CA",
                "type": "appliance switch",
                "tags": "foo bar ham",
                "timeZone": "America/Los_Angeles",
                "copyFromNetworkId": "L_100"
            })
        );
    }

    #[test]
    fn test_network_decode() {
        let net: Network = serde_json::from_value(json!({
            "id": "N_1",
            "name": "ISP",
            "organizationId": 42,
            "type": "combined"
        }))
        .unwrap();
        assert_eq!(net.organization_id.as_deref(), Some("42"));
        assert_eq!(net.tags, None);
    }
}
