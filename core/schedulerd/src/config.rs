// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use confique::{Config, FileFormat, Partial};
use log::LevelFilter;
use std::path::Path;

pub const SYSTEM_CONFIG: &str = "/etc/schedulerd/system.conf";

/// Daemon configuration: environment over config file over built-in
/// defaults. A missing or broken layer falls back to the defaults.
#[derive(Config, Debug)]
pub(crate) struct SchedConfig {
    /// console log level
    #[config(default = "info")]
    pub(crate) log_level: String,

    /// how long a dispatched job may run, in milliseconds; 0 disables the
    /// timeout entirely
    #[config(default = 700)]
    pub(crate) job_timeout_msec: u64,

    /// the unit brought to Start at boot
    #[config(default = "default.target")]
    pub(crate) default_unit: String,
}

impl SchedConfig {
    pub(crate) fn load(path: Option<&Path>) -> SchedConfig {
        type ConfigPartial = <SchedConfig as Config>::Partial;
        let mut partial: ConfigPartial = match Partial::from_env() {
            Err(_) => return SchedConfig::default(),
            Ok(v) => v,
        };
        let file = match path {
            Some(p) => confique::File::with_format(p, FileFormat::Toml),
            None => confique::File::with_format(SYSTEM_CONFIG, FileFormat::Toml),
        };
        partial = match file.load() {
            Err(_) => return SchedConfig::default(),
            Ok(v) => partial.with_fallback(v),
        };
        partial = partial.with_fallback(ConfigPartial::default_values());
        match SchedConfig::from_partial(partial) {
            Ok(v) => v,
            Err(_) => SchedConfig::default(),
        }
    }

    pub(crate) fn log_level_filter(&self) -> LevelFilter {
        match self.log_level.as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            other => {
                println!("unsupported log level '{}', logging is off", other);
                LevelFilter::Off
            }
        }
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
            job_timeout_msec: 700,
            default_unit: String::from("default.target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SchedConfig::load(None);
        assert_eq!(config.job_timeout_msec, 700);
        assert_eq!(config.default_unit, "default.target");
        assert_eq!(config.log_level_filter(), LevelFilter::Info);
    }

    #[test]
    fn config_bad_level_turns_logging_off() {
        let mut config = SchedConfig::default();
        config.log_level = String::from("chatty");
        assert_eq!(config.log_level_filter(), LevelFilter::Off);
    }
}
