//! Provider settings read from the process environment.

use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

pub const ENV_NAME_SERVER: &str = "FI_PSM_NAME_SERVER";
pub const ENV_AM_MSG: &str = "FI_PSM_AM_MSG";
pub const ENV_TAGGED_RMA: &str = "FI_PSM_TAGGED_RMA";
pub const ENV_DEBUG: &str = "FI_PSM_DEBUG";
pub const ENV_WARNING: &str = "FI_PSM_WARNING";
pub const ENV_VERSION_CHECK: &str = "FI_PSM_VERSION_CHECK";
pub const ENV_UUID: &str = "FI_PSM_UUID";

/// Process-wide provider toggles, read once at provider init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEnv {
    /// Resolve destination names through the name server.
    pub name_server: bool,
    /// Use the active-message queue for untagged messages instead of
    /// reserving a tag bit.
    pub am_msg: bool,
    /// Accelerate RMA over tagged messages, reserving a tag bit.
    pub tagged_rma: bool,
    /// Log why hints were rejected.
    pub debug: bool,
    pub warning: bool,
    /// Refuse a transport library whose major version differs.
    pub version_check: bool,
    /// Job key shared by all processes of a job.
    pub uuid: Option<Uuid>,
}

impl Default for ProviderEnv {
    fn default() -> Self {
        Self {
            name_server: false,
            am_msg: false,
            tagged_rma: false,
            debug: false,
            warning: true,
            version_check: true,
            uuid: None,
        }
    }
}

impl ProviderEnv {
    /// Reads every setting from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every setting through `lookup`. Unset names fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| get_int_env(&lookup, name, i32::from(default)) != 0;

        let uuid = lookup(ENV_UUID).and_then(|value| match Uuid::from_str(value.trim()) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                warn!(value = %value, error = %e, "ignoring malformed {ENV_UUID}");
                None
            }
        });

        Self {
            name_server: flag(ENV_NAME_SERVER, defaults.name_server),
            am_msg: flag(ENV_AM_MSG, defaults.am_msg),
            tagged_rma: flag(ENV_TAGGED_RMA, defaults.tagged_rma),
            debug: flag(ENV_DEBUG, defaults.debug),
            warning: flag(ENV_WARNING, defaults.warning),
            version_check: flag(ENV_VERSION_CHECK, defaults.version_check),
            uuid,
        }
    }
}

/// Integer-or-name lookup.
///
/// A value starting with a digit yields its leading digits; `yes`/`on`
/// and `no`/`off` (any case) yield 1 and 0. Anything else, including an
/// unset name, yields `default`.
pub fn get_int_env<F>(lookup: F, name: &str, default: i32) -> i32
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => parse_int_or_name(&value).unwrap_or(default),
        None => default,
    }
}

fn parse_int_or_name(value: &str) -> Option<i32> {
    if value.starts_with(|c: char| c.is_ascii_digit()) {
        let end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        return Some(value[..end].parse::<i32>().unwrap_or(i32::MAX));
    }

    if value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("on") {
        return Some(1);
    }

    if value.eq_ignore_ascii_case("no") || value.eq_ignore_ascii_case("off") {
        return Some(0);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let env = ProviderEnv::from_lookup(|_| None);
        assert_eq!(env, ProviderEnv::default());
        assert!(env.warning);
        assert!(env.version_check);
        assert!(!env.am_msg);
        assert!(!env.tagged_rma);
    }

    #[test]
    fn test_int_or_name_parsing() {
        assert_eq!(parse_int_or_name("0"), Some(0));
        assert_eq!(parse_int_or_name("12abc"), Some(12));
        assert_eq!(parse_int_or_name("YES"), Some(1));
        assert_eq!(parse_int_or_name("On"), Some(1));
        assert_eq!(parse_int_or_name("off"), Some(0));
        assert_eq!(parse_int_or_name("No"), Some(0));
        assert_eq!(parse_int_or_name("maybe"), None);
        assert_eq!(parse_int_or_name(""), None);
        assert_eq!(parse_int_or_name("99999999999"), Some(i32::MAX));
    }

    #[test]
    fn test_unrecognized_value_keeps_default() {
        let env = ProviderEnv::from_lookup(lookup(&[(ENV_WARNING, "loud"), (ENV_DEBUG, "sure")]));
        assert!(env.warning);
        assert!(!env.debug);
    }

    #[test]
    fn test_toggles_from_lookup() {
        let env = ProviderEnv::from_lookup(lookup(&[
            (ENV_AM_MSG, "1"),
            (ENV_TAGGED_RMA, "on"),
            (ENV_VERSION_CHECK, "0"),
            (ENV_WARNING, "off"),
        ]));
        assert!(env.am_msg);
        assert!(env.tagged_rma);
        assert!(!env.version_check);
        assert!(!env.warning);
    }

    #[test]
    fn test_uuid_parsing() {
        let env = ProviderEnv::from_lookup(lookup(&[(
            ENV_UUID,
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
        )]));
        assert_eq!(
            env.uuid.map(|u| u.to_string()),
            Some("67e55044-10b1-426f-9247-bb680e5fe0c8".to_string())
        );

        let env = ProviderEnv::from_lookup(lookup(&[(ENV_UUID, "not-a-uuid")]));
        assert!(env.uuid.is_none());
    }
}
