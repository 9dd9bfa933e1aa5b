use std::fmt;
use std::str::FromStr;

pub const TENANT_ID: &str = "1528983614213726208";
pub const PROJECT_TYPE: &str = "android_iot.karcher";
pub const PROTOCOL_VERSION: &str = "v1";
pub const APP_VERSION_CODE: u32 = 10004;
pub const APP_VERSION_NAME: &str = "1.0.4";
pub const PHONE_BRAND: &str = "xiaomi_mi 9";
pub const PROPERTY_REQUEST_VERSION: &str = "3.0";

/// Properties requested from the robot on every `prop.get`.
pub const ROBOT_PROPERTIES: &[&str] = &[
    "status",
    "firmware_code",
    "firmware",
    "fault",
    "mode",
    "wind",
    "water",
    "repeat_state",
    "charge_state",
    "quantity",
    "work_mode",
    "sweep_type",
    "build_map",
    "cleaning_area",
    "cleaning_time",
    "current_map_id",
    "custom_type",
    "privacy",
    "alarm",
    "volume",
    "tank_state",
    "cloth_state",
    "mop_route",
    "map_num",
    "language",
    "voice_type",
    "quiet_status",
    "quiet_is_open",
];

pub fn user_agent() -> String {
    format!("Android_{TENANT_ID}")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Region {
    Eu,
    Us,
    Cn,
}

impl Region {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Eu => "https://eu-appaiot.3irobotix.net",
            Self::Us => "https://us-appaiot.3irobotix.net",
            Self::Cn => "https://cn-appaiot.3irobotix.net",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Eu => "eu",
            Self::Us => "us",
            Self::Cn => "cn",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eu" => Ok(Self::Eu),
            "us" => Ok(Self::Us),
            "cn" => Ok(Self::Cn),
            other => Err(format!("unknown region: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Language {
    Cn,
    En,
    Es,
    De,
    Fr,
    Pl,
    It,
    Tr,
    Cs,
    Nl,
    Sv,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Self::Cn => "cn",
            Self::En => "en",
            Self::Es => "es",
            Self::De => "de",
            Self::Fr => "fr",
            Self::Pl => "pl",
            Self::It => "it",
            Self::Tr => "tr",
            Self::Cs => "cs",
            Self::Nl => "nl",
            Self::Sv => "sv",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lang = match value.trim().to_ascii_lowercase().as_str() {
            "cn" => Self::Cn,
            "en" => Self::En,
            "es" => Self::Es,
            "de" => Self::De,
            "fr" => Self::Fr,
            "pl" => Self::Pl,
            "it" => Self::It,
            "tr" => Self::Tr,
            "cs" => Self::Cs,
            "nl" => Self::Nl,
            "sv" => Self::Sv,
            other => return Err(format!("unknown language: {other}")),
        };
        Ok(lang)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Product {
    Rcv3,
    Rcv5,
    Rcf5,
}

impl Product {
    pub fn id(self) -> &'static str {
        match self {
            Self::Rcv3 => "1528986273083777024",
            Self::Rcv5 => "1540149850806333440",
            Self::Rcf5 => "1599715149861306368",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        [Self::Rcv3, Self::Rcv5, Self::Rcf5]
            .into_iter()
            .find(|product| product.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region_case_insensitively() {
        assert_eq!("EU".parse::<Region>(), Ok(Region::Eu));
        assert_eq!(" us ".parse::<Region>(), Ok(Region::Us));
        assert!("mars".parse::<Region>().is_err());
    }

    #[test]
    fn resolves_known_products_by_id() {
        assert_eq!(Product::from_id("1540149850806333440"), Some(Product::Rcv5));
        assert_eq!(Product::from_id("42"), None);
    }

    #[test]
    fn user_agent_carries_tenant() {
        assert_eq!(user_agent(), "Android_1528983614213726208");
    }
}
