//! `GetFeature` query parameters.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::layers::WfsLayer;

/// Protocol version requested from the service.
pub const WFS_VERSION: &str = "2.0.0";

/// Service credentials sent as query parameters.
///
/// The password is held as a [`SecretString`]; `Debug` redacts it.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    /// Bundle a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Bundle a username with a password that is already secret.
    #[must_use]
    pub fn from_secret(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Fixed part of every request issued for one layer.
#[derive(Debug, Clone)]
pub struct WfsQuery {
    version: &'static str,
    type_name: &'static str,
    srs_name: String,
    credentials: Option<Credentials>,
}

impl WfsQuery {
    /// Query the layer's feature type in its configured spatial reference.
    #[must_use]
    pub fn for_layer(layer: &WfsLayer) -> Self {
        Self {
            version: WFS_VERSION,
            type_name: layer.type_name,
            srs_name: layer.srs_name(),
            credentials: None,
        }
    }

    /// Attach service credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Requested feature type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Query parameters for the page starting at `start_index`.
    ///
    /// The returned pairs include the password in clear text; callers must
    /// keep them out of logs.
    #[must_use]
    pub fn page_params(&self, start_index: u64, count: u64) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(9);
        if let Some(credentials) = &self.credentials {
            params.push(("username", credentials.username.clone()));
            params.push(("password", credentials.password.expose_secret().clone()));
        }
        params.extend([
            ("SERVICE", "WFS".to_owned()),
            ("REQUEST", "GetFeature".to_owned()),
            ("VERSION", self.version.to_owned()),
            ("TYPENAMES", self.type_name.to_owned()),
            ("SRSNAME", self.srs_name.clone()),
            ("startIndex", start_index.to_string()),
            ("count", count.to_string()),
        ]);
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::CADASTRAL;
    use rstest::rstest;

    fn value<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }

    #[rstest]
    fn page_params_carry_paging_and_type() {
        let params = WfsQuery::for_layer(&CADASTRAL).page_params(2000, 1000);
        assert_eq!(value(&params, "SERVICE"), Some("WFS"));
        assert_eq!(value(&params, "REQUEST"), Some("GetFeature"));
        assert_eq!(value(&params, "VERSION"), Some("2.0.0"));
        assert_eq!(
            value(&params, "TYPENAMES"),
            Some("mat:SamletFastEjendom_Gaeldende")
        );
        assert_eq!(value(&params, "SRSNAME"), Some("EPSG:25832"));
        assert_eq!(value(&params, "startIndex"), Some("2000"));
        assert_eq!(value(&params, "count"), Some("1000"));
        assert_eq!(value(&params, "username"), None);
    }

    #[rstest]
    fn credentials_are_sent_but_not_debugged() {
        let query = WfsQuery::for_layer(&CADASTRAL)
            .with_credentials(Credentials::new("surveyor", "hunter2"));
        let params = query.page_params(0, 1);
        assert_eq!(value(&params, "username"), Some("surveyor"));
        assert_eq!(value(&params, "password"), Some("hunter2"));
        assert!(!format!("{query:?}").contains("hunter2"));
    }
}
