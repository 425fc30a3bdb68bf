use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decode::service::Config2Level;
use crate::decode::session::SessionLevel;
use crate::error::QueryError;
use crate::facade::directory::DirectoryOptions;
use crate::facade::services::ServiceOptions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SysqConfig {
    pub targets: TargetsConfig,
    pub sessions: SessionsConfig,
    pub directory: DirectoryConfig,
    pub services: ServicesConfig,
    pub folders: FoldersConfig,
}

impl SysqConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        self.targets.validate()?;
        self.sessions.validate()?;
        self.directory.validate()?;
        self.services.validate()?;
        self.folders.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TargetsConfig {
    /// Remote hosts to query; empty means the local machine.
    pub hosts: Vec<String>,
}

impl TargetsConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(QueryError::ConfigError {
                message: "targets.hosts 不能包含空主机名".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    pub level: u32,
    pub resolve_hosts: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            level: 10,
            resolve_hosts: true,
        }
    }
}

impl SessionsConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        self.session_level().map(|_| ())
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn session_level(&self) -> Result<SessionLevel, QueryError> {
        SessionLevel::from_code(self.level).ok_or_else(|| QueryError::ConfigError {
            message: format!("sessions.level 只支持 10 或 502，当前为 {}", self.level),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub max_depth: u32,
    pub large_fetch: bool,
    pub include_hidden: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let options = DirectoryOptions::default();
        Self {
            max_depth: options.max_depth,
            large_fetch: options.large_fetch,
            include_hidden: options.include_hidden,
        }
    }
}

impl DirectoryConfig {
    pub const MAX_DEPTH_LIMIT: u32 = 64;

    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.max_depth > Self::MAX_DEPTH_LIMIT {
            return Err(QueryError::ConfigError {
                message: format!("directory.max_depth 不能大于 {}", Self::MAX_DEPTH_LIMIT),
            });
        }
        Ok(())
    }

    pub fn options(&self) -> DirectoryOptions {
        DirectoryOptions {
            max_depth: self.max_depth,
            large_fetch: self.large_fetch,
            include_hidden: self.include_hidden,
        }
    }
}

/// Which `QueryServiceConfig2W` levels to query per service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config2Toggles {
    pub description: bool,
    pub failure_actions: bool,
    pub delayed_auto_start: bool,
    pub failure_actions_flag: bool,
    pub sid_info: bool,
    pub required_privileges: bool,
    pub preshutdown: bool,
    pub triggers: bool,
    pub launch_protected: bool,
}

impl Default for Config2Toggles {
    fn default() -> Self {
        Self {
            description: true,
            failure_actions: true,
            delayed_auto_start: true,
            failure_actions_flag: true,
            sid_info: true,
            required_privileges: true,
            preshutdown: true,
            triggers: true,
            launch_protected: true,
        }
    }
}

impl Config2Toggles {
    pub fn levels(&self) -> Vec<Config2Level> {
        [
            (self.description, Config2Level::Description),
            (self.failure_actions, Config2Level::FailureActions),
            (self.delayed_auto_start, Config2Level::DelayedAutoStart),
            (self.failure_actions_flag, Config2Level::FailureActionsFlag),
            (self.sid_info, Config2Level::SidInfo),
            (self.required_privileges, Config2Level::RequiredPrivileges),
            (self.preshutdown, Config2Level::PreshutdownInfo),
            (self.triggers, Config2Level::TriggerInfo),
            (self.launch_protected, Config2Level::LaunchProtected),
        ]
        .into_iter()
        .filter_map(|(on, level)| on.then_some(level))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServicesConfig {
    pub include_drivers: bool,
    /// Services to describe; empty enumerates all of them.
    pub names: Vec<String>,
    pub config2_levels: Config2Toggles,
}

impl ServicesConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.names.iter().any(|n| n.trim().is_empty()) {
            return Err(QueryError::ConfigError {
                message: "services.names 不能包含空服务名".to_string(),
            });
        }
        Ok(())
    }

    pub fn options(&self) -> ServiceOptions {
        ServiceOptions {
            include_drivers: self.include_drivers,
            names: self.names.clone(),
            levels: self.config2_levels.levels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FoldersConfig {
    pub names: Vec<String>,
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            names: [
                "Desktop",
                "Documents",
                "Downloads",
                "LocalAppData",
                "RoamingAppData",
                "ProgramData",
                "ProgramFiles",
                "Windows",
                "System",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

impl FoldersConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.names.iter().any(|n| n.trim().is_empty()) {
            return Err(QueryError::ConfigError {
                message: "folders.names 不能包含空名称".to_string(),
            });
        }
        Ok(())
    }
}

#[allow(clippy::missing_errors_doc)]
pub fn load_yaml_file(path: &Path) -> Result<SysqConfig, QueryError> {
    let text = std::fs::read_to_string(path).map_err(QueryError::IoError)?;
    serde_yaml::from_str::<SysqConfig>(&text).map_err(|e| QueryError::ConfigError {
        message: format!("解析配置 YAML 失败: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config2Toggles, ServicesConfig};
    use crate::decode::service::Config2Level;

    #[test]
    fn toggles_map_to_levels_in_order() {
        let toggles = Config2Toggles {
            description: false,
            triggers: false,
            ..Config2Toggles::default()
        };
        let levels = toggles.levels();
        assert_eq!(levels.len(), 7);
        assert_eq!(levels[0], Config2Level::FailureActions);
        assert!(!levels.contains(&Config2Level::TriggerInfo));
        assert_eq!(Config2Toggles::default().levels(), Config2Level::ALL.to_vec());
    }

    #[test]
    fn service_options_carry_names_and_drivers() {
        let cfg = ServicesConfig {
            include_drivers: true,
            names: vec!["Spooler".to_string()],
            ..ServicesConfig::default()
        };
        let options = cfg.options();
        assert_eq!(options.service_type(), 0x3B);
        assert_eq!(options.names, ["Spooler"]);
    }
}
