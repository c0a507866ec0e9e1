//! Provider detection: a table-driven host match, not pattern dispatch.

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Civitai,
    Huggingface,
    Generic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Civitai => "civitai",
            Provider::Huggingface => "huggingface",
            Provider::Generic => "generic",
        }
    }
}

/// `(host_suffix, provider)` table. A URL's host matches an entry when it
/// equals the suffix or ends with `.<suffix>`.
const HOST_TABLE: &[(&str, Provider)] = &[
    ("civitai.com", Provider::Civitai),
    ("huggingface.co", Provider::Huggingface),
    ("hf.co", Provider::Huggingface),
];

pub fn detect(url: &str) -> Provider {
    let host = match url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(h) => h,
        None => return Provider::Generic,
    };
    let host = host.to_ascii_lowercase();
    for (suffix, provider) in HOST_TABLE {
        if host == *suffix || host.ends_with(&format!(".{suffix}")) {
            return *provider;
        }
    }
    Provider::Generic
}

/// Provider-appropriate bearer header, by host.
pub fn bearer_header(provider: Provider, civitai_key: Option<&str>, huggingface_key: Option<&str>) -> Option<(String, String)> {
    match provider {
        Provider::Civitai => civitai_key.map(|k| ("Authorization".to_string(), format!("Bearer {k}"))),
        Provider::Huggingface => huggingface_key.map(|k| ("Authorization".to_string(), format!("Bearer {k}"))),
        Provider::Generic => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_civitai() {
        assert_eq!(detect("https://civitai.com/api/download/models/1"), Provider::Civitai);
        assert_eq!(detect("https://cdn.civitai.com/model.safetensors"), Provider::Civitai);
    }

    #[test]
    fn detects_huggingface() {
        assert_eq!(detect("https://huggingface.co/org/model/resolve/main/f.bin"), Provider::Huggingface);
        assert_eq!(detect("https://hf.co/org/model"), Provider::Huggingface);
    }

    #[test]
    fn unknown_host_is_generic() {
        assert_eq!(detect("https://example.com/file.bin"), Provider::Generic);
    }

    #[test]
    fn bearer_header_only_when_key_present() {
        assert!(bearer_header(Provider::Civitai, None, None).is_none());
        let (name, value) = bearer_header(Provider::Civitai, Some("abc"), None).unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer abc");
    }
}
