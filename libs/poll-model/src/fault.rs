//! Per-entity fault bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a fault message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Normal,
    Warning,
    Fail,
}

impl Default for MessageLevel {
    fn default() -> Self {
        MessageLevel::Info
    }
}

/// Machine-readable fault code carried alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    Ok,
    PointWriteOk,
    NetworkError,
    DeviceError,
    PointError,
    PointWriteError,
    SystemError,
}

impl Default for FaultCode {
    fn default() -> Self {
        FaultCode::Ok
    }
}

/// Fault state updated on every success and failure of the owning entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonFault {
    #[serde(default)]
    pub in_fault: bool,
    #[serde(default)]
    pub message_level: MessageLevel,
    #[serde(default)]
    pub message_code: FaultCode,
    #[serde(default)]
    pub message: String,
    pub last_fail: Option<DateTime<Utc>>,
    pub last_ok: Option<DateTime<Utc>>,
}

impl CommonFault {
    /// Record a success, clearing the fault flag and stamping `last_ok`.
    pub fn set_ok(&mut self, code: FaultCode, message: impl Into<String>) {
        self.in_fault = false;
        self.message_level = MessageLevel::Info;
        self.message_code = code;
        self.message = message.into();
        self.last_ok = Some(Utc::now());
    }

    /// Record a failure and stamp `last_fail`.
    pub fn set_fail(&mut self, level: MessageLevel, code: FaultCode, message: impl Into<String>) {
        self.in_fault = true;
        self.message_level = level;
        self.message_code = code;
        self.message = message.into();
        self.last_fail = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_clears_fault_and_stamps_last_ok() {
        let mut fault = CommonFault::default();
        fault.set_fail(MessageLevel::Fail, FaultCode::PointError, "boom");
        assert!(fault.in_fault);
        assert!(fault.last_fail.is_some());

        fault.set_ok(FaultCode::Ok, "");
        assert!(!fault.in_fault);
        assert!(fault.last_ok.is_some());
        assert_eq!(fault.message_code, FaultCode::Ok);
    }
}
