//! Parsing of volume creation options.
//!
//! A create request carries a flat string map. Three keys are understood by
//! the registry itself; every other key is passed to `sshfs` verbatim as a
//! `-o` mount option.

use secrecy::SecretString;

use crate::error::{VolumeError, VolumeResult};

/// Option key holding the remote target (`user@host:/path`).
pub const REMOTE_TARGET_OPTION: &str = "sshcmd";
/// Option key holding the password piped to `sshfs`.
pub const CREDENTIAL_OPTION: &str = "password";
/// Option key overriding the remote ssh port.
pub const PORT_OPTION: &str = "port";

/// Options of a volume, as parsed from a create request.
#[derive(Debug)]
pub struct VolumeOptions {
    pub remote_target: String,
    pub credential: Option<SecretString>,
    pub port: Option<u16>,
    /// Pass-through mount options, `key` or `key=value`, in request order.
    pub extra_options: Vec<String>,
}

impl VolumeOptions {
    /// Parse a create request's option map for the volume `name`.
    ///
    /// Empty values for `password` and `port` count as unset. Unknown keys
    /// with an empty value become a bare `key` flag.
    pub fn parse<I, K, V>(name: &str, options: I) -> VolumeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut remote_target = None;
        let mut credential = None;
        let mut port = None;
        let mut extra_options = Vec::new();

        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                REMOTE_TARGET_OPTION => remote_target = Some(value.to_string()),
                CREDENTIAL_OPTION => {
                    credential = (!value.is_empty()).then(|| SecretString::from(value));
                }
                PORT_OPTION => port = parse_port(name, value)?,
                _ if value.is_empty() => extra_options.push(key.to_string()),
                _ => extra_options.push(format!("{key}={value}")),
            }
        }

        let remote_target = remote_target
            .filter(|target| !target.is_empty())
            .ok_or_else(|| VolumeError::MissingRequiredOption {
                name: name.to_string(),
                option: REMOTE_TARGET_OPTION,
            })?;

        Ok(Self {
            remote_target,
            credential,
            port,
            extra_options,
        })
    }
}

fn parse_port(name: &str, value: &str) -> VolumeResult<Option<u16>> {
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u16>() {
        Ok(0) => Err(invalid_port(name, "port 0 is not connectable".to_string())),
        Ok(port) => Ok(Some(port)),
        Err(e) => Err(invalid_port(name, format!("'{value}': {e}"))),
    }
}

fn invalid_port(name: &str, reason: String) -> VolumeError {
    VolumeError::InvalidOption {
        name: name.to_string(),
        option: PORT_OPTION.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_known_and_extra_options() {
        let opts = VolumeOptions::parse(
            "data",
            [
                ("sshcmd", "user@host:/path"),
                ("password", "secret"),
                ("port", "2222"),
                ("compression", "yes"),
                ("allow_other", ""),
            ],
        )
        .unwrap();

        assert_eq!(opts.remote_target, "user@host:/path");
        assert_eq!(opts.credential.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(opts.port, Some(2222));
        assert_eq!(opts.extra_options, vec!["compression=yes", "allow_other"]);
    }

    #[test]
    fn test_missing_remote_target() {
        let err = VolumeOptions::parse("data", [("password", "secret")]).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::MissingRequiredOption { option: "sshcmd", .. }
        ));

        let err = VolumeOptions::parse("data", [("sshcmd", "")]).unwrap_err();
        assert!(matches!(err, VolumeError::MissingRequiredOption { .. }));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let opts =
            VolumeOptions::parse("data", [("sshcmd", "h:/"), ("password", ""), ("port", "")])
                .unwrap();
        assert!(opts.credential.is_none());
        assert!(opts.port.is_none());
        assert!(opts.extra_options.is_empty());
    }

    #[test]
    fn test_invalid_port() {
        for bad in ["ssh", "70000", "0", "-1"] {
            let err = VolumeOptions::parse("data", [("sshcmd", "h:/"), ("port", bad)]).unwrap_err();
            assert!(
                matches!(&err, VolumeError::InvalidOption { option, .. } if option == "port"),
                "{bad} should be rejected, got {err}"
            );
        }
    }

    #[test]
    fn test_debug_redacts_credential() {
        let opts = VolumeOptions::parse("data", [("sshcmd", "h:/"), ("password", "hunter2")]).unwrap();
        assert!(!format!("{opts:?}").contains("hunter2"));
    }
}
