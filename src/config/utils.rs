use std::str::FromStr;

/// Read an environment variable, treating blank values as unset
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an optional environment variable into `T`
pub fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key} ('{raw}'): {e}").into()),
        None => Ok(None),
    }
}

/// Parse a boolean flag. Accepts true/false, 1/0, yes/no, on/off.
pub fn parse_bool(key: &str, raw: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("Invalid boolean for {key}: '{other}'").into()),
    }
}

/// Read an optional boolean environment variable
pub fn env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    env_string(key).map(|raw| parse_bool(key, &raw)).transpose()
}

/// Split a comma-separated list, trimming entries and dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
