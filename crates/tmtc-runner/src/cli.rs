//! Command line options of `tmtcd`.

use crate::error::{RunnerError, RunnerResult};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tmtc_codec::{FramingConfig, LengthFieldConfig};

/// Stream framing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FramingKind {
    /// Frames end with a delimiter (text devices).
    Delimiter,
    /// Frames start with a length header (binary devices).
    LengthField,
}

#[derive(Parser, Debug)]
#[command(
    name = "tmtcd",
    version,
    about = "Drive a TM/TC device route over TCP, writing records as JSON lines"
)]
pub struct Cli {
    /// Route configuration (YAML).
    #[arg(short, long, value_name = "PATH")]
    pub config: PathBuf,

    /// Device address, host:port.
    #[arg(long, value_name = "ADDR")]
    pub connect: String,

    /// Connection source name stamped on raw data (default: the address).
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, value_enum, default_value_t = FramingKind::Delimiter)]
    pub framing: FramingKind,

    /// Frame delimiter; `\n`, `\r` and `\t` escapes are understood.
    #[arg(long, default_value = "\\n")]
    pub delimiter: String,

    /// Bytes before the length field.
    #[arg(long, default_value_t = 0)]
    pub length_field_skip: usize,

    /// Length field size in bytes.
    #[arg(long, default_value_t = 2)]
    pub length_field_size: usize,

    /// Length field is little endian.
    #[arg(long)]
    pub length_field_little_endian: bool,

    /// Added to the length value.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub length_field_offset: i64,

    /// Length value counts the skipped bytes and the field itself.
    #[arg(long)]
    pub length_field_inclusive: bool,

    /// Seconds between reconnection attempts.
    #[arg(long, default_value_t = 5)]
    pub retry_secs: u64,
}

impl Cli {
    /// Framing configuration selected by the options.
    pub fn framing_config(&self) -> RunnerResult<FramingConfig> {
        match self.framing {
            FramingKind::Delimiter => {
                let delimiter = unescape(&self.delimiter);
                if delimiter.is_empty() {
                    return Err(RunnerError::Option("empty delimiter".to_string()));
                }
                Ok(FramingConfig::Delimiter { delimiter })
            }
            FramingKind::LengthField => {
                if self.length_field_size == 0 || self.length_field_size > 8 {
                    return Err(RunnerError::Option(format!(
                        "length field size {} not in 1..=8",
                        self.length_field_size
                    )));
                }
                Ok(FramingConfig::LengthField(LengthFieldConfig {
                    header_skip: self.length_field_skip,
                    field_length: self.length_field_size,
                    big_endian: !self.length_field_little_endian,
                    value_offset: self.length_field_offset,
                    consider_skipped: self.length_field_inclusive,
                    consider_field_length: self.length_field_inclusive,
                    ..LengthFieldConfig::default()
                }))
            }
        }
    }

    pub fn source_name(&self) -> String {
        self.source
            .clone()
            .unwrap_or_else(|| format!("tcp://{}", self.connect))
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs.max(1))
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["tmtcd", "--config", "route.yaml", "--connect", "psu:4000"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_default_delimiter_framing() {
        let cli = parse(&[]);
        assert_eq!(
            cli.framing_config().unwrap(),
            FramingConfig::Delimiter {
                delimiter: "\n".into()
            }
        );
        assert_eq!(cli.source_name(), "tcp://psu:4000");
        assert_eq!(cli.retry(), Duration::from_secs(5));
    }

    #[test]
    fn test_escaped_delimiter() {
        let cli = parse(&["--delimiter", "\\r\\n", "--source", "bench"]);
        assert_eq!(
            cli.framing_config().unwrap(),
            FramingConfig::Delimiter {
                delimiter: "\r\n".into()
            }
        );
        assert_eq!(cli.source_name(), "bench");
    }

    #[test]
    fn test_length_field_framing() {
        let cli = parse(&[
            "--framing",
            "length-field",
            "--length-field-skip",
            "1",
            "--length-field-size",
            "1",
            "--length-field-offset",
            "-2",
            "--length-field-inclusive",
        ]);
        let FramingConfig::LengthField(config) = cli.framing_config().unwrap() else {
            panic!("expected length-field framing");
        };
        assert_eq!(config.header_skip, 1);
        assert_eq!(config.field_length, 1);
        assert!(config.big_endian);
        assert_eq!(config.value_offset, -2);
        assert!(config.consider_skipped && config.consider_field_length);
    }

    #[test]
    fn test_invalid_framing_options() {
        let cli = parse(&["--framing", "length-field", "--length-field-size", "9"]);
        assert!(matches!(cli.framing_config(), Err(RunnerError::Option(_))));
        let cli = parse(&["--delimiter", ""]);
        assert!(matches!(cli.framing_config(), Err(RunnerError::Option(_))));
    }

    #[test]
    fn test_config_and_connect_required() {
        assert!(Cli::try_parse_from(["tmtcd", "--config", "route.yaml"]).is_err());
        assert!(Cli::try_parse_from(["tmtcd", "--connect", "psu:4000"]).is_err());
    }
}
