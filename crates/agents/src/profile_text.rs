//! Line-prefix extraction from materialized profile text.
//!
//! Profile text is the canonical flat rendering produced by the retriever,
//! with `Key: value` lines ("Company Name:", "Country:", "Provider Type:",
//! "Growbal Link:", ...).

/// The display name used when a profile carries no "Company Name:" line.
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// Value of the first line containing `prefix`, trimmed.
pub fn extract_field<'a>(profile_text: &'a str, prefix: &str) -> Option<&'a str> {
    for line in profile_text.lines() {
        if let Some(idx) = line.find(prefix) {
            let value = line[idx + prefix.len()..].trim();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Company name for progress events.
pub fn extract_profile_name(profile_text: &str) -> String {
    extract_field(profile_text, "Company Name:")
        .unwrap_or(UNKNOWN_COMPANY)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Profile ID: 12\nCompany Name: Acme Advisors \nCountry: UAE\nProvider Type: Accounting Firm\nGrowbal Link: https://growbal.example/p/12";

    #[test]
    fn extracts_trimmed_name() {
        assert_eq!(extract_profile_name(SAMPLE), "Acme Advisors");
    }

    #[test]
    fn missing_name_falls_back() {
        assert_eq!(extract_profile_name("Country: UAE"), UNKNOWN_COMPANY);
    }

    #[test]
    fn extracts_other_fields() {
        assert_eq!(extract_field(SAMPLE, "Country:"), Some("UAE"));
        assert_eq!(extract_field(SAMPLE, "Provider Type:"), Some("Accounting Firm"));
        assert_eq!(
            extract_field(SAMPLE, "Growbal Link:"),
            Some("https://growbal.example/p/12")
        );
        assert_eq!(extract_field(SAMPLE, "Missing:"), None);
    }

    #[test]
    fn empty_value_treated_as_missing() {
        assert_eq!(extract_field("Country:\nCompany Name: X", "Country:"), None);
    }
}
