use crate::domain::crypto::{CryptoError, Key, decrypt};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UserProfile {
    pub nickname: String,
    pub avatar_url: String,
    pub email: String,
    pub phone: String,
    pub device: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserProfileWire {
    nick_name: String,
    avatar_url: String,
    email: String,
    phone: String,
    device: i64,
}

impl UserProfile {
    /// Maps the profile record; `email` and `phone` arrive encrypted with the request key.
    pub fn from_value(value: &serde_json::Value, key: &Key) -> Result<Self, UserProfileError> {
        let wire: UserProfileWire = serde_json::from_value(value.clone())?;
        Ok(Self {
            nickname: wire.nick_name,
            avatar_url: wire.avatar_url,
            email: decrypt_optional(&wire.email, key)?,
            phone: decrypt_optional(&wire.phone, key)?,
            device: wire.device,
        })
    }
}

fn decrypt_optional(value: &str, key: &Key) -> Result<String, CryptoError> {
    if value.is_empty() {
        return Ok(String::new());
    }
    decrypt(value, key)
}

#[derive(Debug, thiserror::Error)]
pub enum UserProfileError {
    #[error("invalid profile record: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TENANT_ID;
    use crate::domain::crypto::{derive_request_key, encrypt};
    use serde_json::json;

    #[test]
    fn decrypts_contact_fields() {
        let key = derive_request_key(TENANT_ID);
        let profile = UserProfile::from_value(
            &json!({
                "nickName": "Robo Owner",
                "avatarUrl": "https://cdn/a.png",
                "email": encrypt("owner@example.com", &key),
                "phone": "",
                "device": 2,
                "lastLogin": 17
            }),
            &key,
        )
        .expect("profile");
        assert_eq!(profile.nickname, "Robo Owner");
        assert_eq!(profile.email, "owner@example.com");
        assert_eq!(profile.phone, "");
        assert_eq!(profile.device, 2);
    }
}
