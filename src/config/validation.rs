use crate::config::types::{Config, CrawlerConfig, ExtractConfig, OutputConfig, RequestConfig, RoutesConfig};
use crate::crawler::ExtractionRule;
use crate::output::RESERVED_COLUMNS;
use crate::targets::Target;
use crate::url::render_target_url;
use crate::ConfigError;
use std::collections::HashSet;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_routes(&config.routes)?;
    validate_request_config(&config.request, &config.routes)?;
    validate_output_config(&config.output)?;
    validate_extract_config(&config.extract)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.max_domain_concurrency < 1 {
        return Err(ConfigError::Validation(
            "max_domain_concurrency must be >= 1".to_string(),
        ));
    }

    if config.concurrency > config.max_domain_concurrency {
        return Err(ConfigError::Validation(format!(
            "concurrency ({}) cannot exceed max_domain_concurrency ({})",
            config.concurrency, config.max_domain_concurrency
        )));
    }

    if config.request_spacing < 100 {
        return Err(ConfigError::Validation(format!(
            "request_spacing must be >= 100ms, got {}ms",
            config.request_spacing
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.retry_base_delay > config.max_backoff {
        return Err(ConfigError::Validation(format!(
            "retry_base_delay ({}ms) cannot exceed max_backoff ({}ms)",
            config.retry_base_delay, config.max_backoff
        )));
    }

    if config.fetch_timeout < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout must be >= 1s".to_string(),
        ));
    }

    if config.flush_threshold < 1 || config.flush_interval < 1 {
        return Err(ConfigError::Validation(
            "flush_threshold and flush_interval must both be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the route lists and date range
fn validate_routes(config: &RoutesConfig) -> Result<(), ConfigError> {
    if config.origins.is_empty() {
        return Err(ConfigError::Validation("origins cannot be empty".to_string()));
    }

    if config.destinations.is_empty() {
        return Err(ConfigError::Validation(
            "destinations cannot be empty".to_string(),
        ));
    }

    for code in config.origins.iter().chain(config.destinations.iter()) {
        validate_place_code(code)?;
    }

    let end = config.end_date.ok_or(ConfigError::UnboundedRange)?;
    if config.start_date > end {
        return Err(ConfigError::Validation(format!(
            "start_date {} is after end_date {}",
            config.start_date, end
        )));
    }

    Ok(())
}

/// Place codes end up inside URL paths, so keep them to a safe alphabet
fn validate_place_code(code: &str) -> Result<(), ConfigError> {
    if code.is_empty() {
        return Err(ConfigError::Validation(
            "origin/destination codes cannot be empty".to_string(),
        ));
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ConfigError::Validation(format!(
            "code '{}' must contain only ASCII letters, digits and hyphens",
            code
        )));
    }

    Ok(())
}

/// Validates request configuration by rendering a sample URL
fn validate_request_config(
    config: &RequestConfig,
    routes: &RoutesConfig,
) -> Result<(), ConfigError> {
    if !config.url_template.contains("{origin}") || !config.url_template.contains("{destination}")
    {
        return Err(ConfigError::InvalidUrl(format!(
            "'{}' must contain {{origin}} and {{destination}}",
            config.url_template
        )));
    }

    let sample = Target::new(
        routes.origins.first().map(String::as_str).unwrap_or("AAA"),
        routes.destinations.first().map(String::as_str).unwrap_or("BBB"),
        routes.start_date,
    );
    let url = render_target_url(&config.url_template, &sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", config.url_template, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "'{}' must use http or https",
            config.url_template
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "'{}' has no host",
            config.url_template
        )));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    if config.respect_robots && config.robots_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "robots_agent cannot be empty when respect_robots is set".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    if config.state_path.is_empty() {
        return Err(ConfigError::Validation(
            "state_path cannot be empty".to_string(),
        ));
    }

    if config.ledger_path.is_empty() {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the extraction rule: field names, then selector syntax
fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    if config.fields.is_empty() {
        return Err(ConfigError::Validation(
            "extract rule needs at least one field".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "field names cannot be empty".to_string(),
            ));
        }

        if RESERVED_COLUMNS.contains(&field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "field name '{}' collides with a built-in column",
                field.name
            )));
        }

        if !seen.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }

        if matches!(field.attr.as_deref(), Some(a) if a.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "field '{}' has an empty attr",
                field.name
            )));
        }
    }

    ExtractionRule::compile(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use chrono::NaiveDate;

    fn routes() -> RoutesConfig {
        RoutesConfig {
            origins: vec!["MAD".to_string()],
            destinations: vec!["HND".to_string()],
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 2),
            granularity: Default::default(),
        }
    }

    fn request(template: &str) -> RequestConfig {
        RequestConfig {
            url_template: template.to_string(),
            user_agents: vec![],
            respect_robots: true,
            robots_agent: "fare-harvest".to_string(),
        }
    }

    fn field(name: &str, selector: Option<&str>) -> FieldConfig {
        FieldConfig {
            name: name.to_string(),
            selector: selector.map(String::from),
            attr: None,
        }
    }

    #[test]
    fn test_validate_place_code() {
        assert!(validate_place_code("MAD").is_ok());
        assert!(validate_place_code("new-york").is_ok());

        assert!(validate_place_code("").is_err());
        assert!(validate_place_code("MAD/../x").is_err());
        assert!(validate_place_code("a b").is_err());
    }

    #[test]
    fn test_routes_reject_inverted_range() {
        let mut config = routes();
        config.end_date = NaiveDate::from_ymd_opt(2025, 5, 1);
        assert!(matches!(
            validate_routes(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_routes_reject_empty_lists() {
        let mut config = routes();
        config.origins.clear();
        assert!(validate_routes(&config).is_err());
    }

    #[test]
    fn test_request_template() {
        let routes = routes();
        assert!(validate_request_config(
            &request("https://example.com/{origin}/{destination}/?d={date}"),
            &routes
        )
        .is_ok());

        // Missing placeholders
        assert!(validate_request_config(&request("https://example.com/flights"), &routes).is_err());
        // Not a URL at all
        assert!(validate_request_config(&request("{origin}-{destination}"), &routes).is_err());
        // Wrong scheme
        assert!(
            validate_request_config(&request("ftp://example.com/{origin}/{destination}"), &routes)
                .is_err()
        );
    }

    #[test]
    fn test_extract_field_names() {
        let ok = ExtractConfig {
            root: "td.cell".to_string(),
            fields: vec![field("price", Some(".price")), field("label", None)],
        };
        assert!(validate_extract_config(&ok).is_ok());

        let duplicate = ExtractConfig {
            root: "td.cell".to_string(),
            fields: vec![field("price", Some(".a")), field("price", Some(".b"))],
        };
        assert!(validate_extract_config(&duplicate).is_err());

        let reserved = ExtractConfig {
            root: "td.cell".to_string(),
            fields: vec![field("origin", None)],
        };
        assert!(validate_extract_config(&reserved).is_err());

        let empty = ExtractConfig {
            root: "td.cell".to_string(),
            fields: vec![],
        };
        assert!(validate_extract_config(&empty).is_err());
    }

    #[test]
    fn test_extract_bad_selector() {
        let config = ExtractConfig {
            root: "td[[".to_string(),
            fields: vec![field("price", None)],
        };
        assert!(matches!(
            validate_extract_config(&config),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }
}
