//! Session cookies exported from a browser in Netscape `cookies.txt` format.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    values: BTreeMap<String, String>,
}

impl SessionCookies {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cookie file {}", path.display()))?;
        let cookies = Self::parse_netscape(&content);
        cookies
            .validate()
            .with_context(|| format!("Invalid cookie file {}", path.display()))?;
        Ok(cookies)
    }

    /// Seven tab/space separated columns per line; name and value are the last two.
    pub fn parse_netscape(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("# ") {
                continue;
            }
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 7 {
                values.insert(parts[5].to_string(), parts[6].to_string());
            }
        }
        Self { values }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_id().is_none() || self.user_id().is_none() {
            anyhow::bail!("missing sessionid or ds_user_id");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get("sessionid")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get("ds_user_id")
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.get("csrftoken")
    }

    pub fn mid(&self) -> Option<&str> {
        self.get("mid")
    }

    pub fn header_value(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        # This is a generated file!\n\
        \n\
        .instagram.com\tTRUE\t/\tTRUE\t1999999999\tcsrftoken\tabc123\n\
        #HttpOnly_.instagram.com\tTRUE\t/\tTRUE\t1999999999\tsessionid\t42%3Asess\n\
        .instagram.com\tTRUE\t/\tTRUE\t1999999999\tds_user_id\t42\n\
        broken line\n";

    #[test]
    fn test_parse_netscape_strips_http_only_prefix() {
        let cookies = SessionCookies::parse_netscape(SAMPLE);
        assert_eq!(cookies.session_id(), Some("42%3Asess"));
        assert_eq!(cookies.user_id(), Some("42"));
        assert_eq!(cookies.csrf_token(), Some("abc123"));
        assert_eq!(cookies.mid(), None);
        assert!(cookies.validate().is_ok());
    }

    #[test]
    fn test_header_value_is_sorted_and_joined() {
        let cookies = SessionCookies::from_pairs([("sessionid", "s"), ("csrftoken", "c")]);
        assert_eq!(cookies.header_value(), "csrftoken=c; sessionid=s");
    }

    #[test]
    fn test_load_rejects_file_without_session() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            ".instagram.com\tTRUE\t/\tTRUE\t1999999999\tcsrftoken\tabc\n"
        )
        .unwrap();

        let err = SessionCookies::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("missing sessionid"));
    }
}
