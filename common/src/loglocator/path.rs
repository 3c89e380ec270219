// Log path templates with %{name} placeholders

use crate::errors::TemplateError;
use crate::models::JobRef;
use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Expansion of `%{std}`
pub const STD_LAYOUT: &str = "%{jobnet_start_date}/%{jobnet}/%{jobnet_start_time}/%{subsystem}.%{job}";

const DATE_FORMAT: &str = "%Y%m%d";
const TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%\{([A-Za-z_]+)\}").expect("placeholder regex is valid"))
}

/// Values a template may refer to
#[derive(Debug, Clone)]
pub struct LogPathParams<'a> {
    pub job_ref: &'a JobRef,
    pub jobnet_id: &'a str,
    pub job_start_time: DateTime<Local>,
    pub jobnet_start_time: DateTime<Local>,
}

impl LogPathParams<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "subsystem" => self.job_ref.subsystem.clone(),
            "job" => self.job_ref.name.clone(),
            "run" => self.job_ref.location.clone(),
            "jobnet" => self.jobnet_id.replace('/', "."),
            "job_start_date" => self.job_start_time.format(DATE_FORMAT).to_string(),
            "job_start_time" => self.job_start_time.format(TIME_FORMAT).to_string(),
            "jobnet_start_date" => self.jobnet_start_time.format(DATE_FORMAT).to_string(),
            "jobnet_start_time" => self.jobnet_start_time.format(TIME_FORMAT).to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Path or object key template, e.g. `/var/log/jobrun/%{std}.log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilePath {
    template: String,
}

impl LogFilePath {
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(Self { template })
    }

    /// `<dir>/%{std}.log`
    pub fn in_dir(dir: &str) -> Result<Self, TemplateError> {
        Self::new(format!("{}/%{{std}}.log", dir.trim_end_matches('/')))
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Expand every placeholder; unknown names are an error
    pub fn format(&self, params: &LogPathParams<'_>) -> Result<String, TemplateError> {
        let template = self.template.replace("%{std}", STD_LAYOUT);
        let mut unknown = None;

        let expanded = placeholder_regex().replace_all(&template, |caps: &Captures<'_>| {
            match params.lookup(&caps[1]) {
                Some(value) => value,
                None => {
                    unknown.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });

        match unknown {
            Some(placeholder) => Err(TemplateError::UnknownPlaceholder {
                placeholder,
                template: self.template.clone(),
            }),
            None => Ok(expanded.into_owned()),
        }
    }
}
