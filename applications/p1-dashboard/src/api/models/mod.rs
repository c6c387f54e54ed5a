use crate::error::Result;
use crate::timeframe::{Selection, Timeframe};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/timeframe`. Both fields are parsed by hand so a bad
/// value is reported as a selection error rather than a rejected body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeframeRequest {
    pub timeframe: String,
    #[serde(default)]
    pub selection: Option<String>,
}

impl TimeframeRequest {
    pub fn parse(&self) -> Result<(Timeframe, Option<Selection>)> {
        let timeframe = self.timeframe.parse()?;
        let selection = self
            .selection
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Selection>)
            .transpose()?;
        Ok((timeframe, selection))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionRequest {
    pub connected: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionResponse {
    pub connected: bool,
}
