//! Build information for `somcli version`

use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: String,
    pub git_commit: String,
    pub build_date: String,
    pub platform: String,
}

impl BuildInfo {
    /// Commit and date are injected at compile time through
    /// `SOMCLI_GIT_COMMIT` and `SOMCLI_BUILD_DATE`
    pub fn current() -> Self {
        Self {
            version: format!("v{}", VERSION),
            git_commit: option_env!("SOMCLI_GIT_COMMIT").unwrap_or("unknown").to_string(),
            build_date: option_env!("SOMCLI_BUILD_DATE").unwrap_or("unknown").to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "somcli - Structure-Ops CLI\n\n\
             Version:      {}\n\
             Git commit:   {}\n\
             Built:        {}\n\
             Platform:     {}\n",
            self.version, self.git_commit, self.build_date, self.platform
        )
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
