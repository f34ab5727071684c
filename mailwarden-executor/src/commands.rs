//! MTA control command strings
//!
//! Exact `pmta` invocations, all sudo-wrapped. The queue/pool naming
//! convention is `*/<isp>-pool` for pool-wide operations and `<isp>/*` for
//! per-source operations.

use mailwarden_core::Isp;

const SUDO_PREFIX: &str = "sudo /usr/sbin/";

/// One MTA control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtaCommand {
    DisableSource { ip: String, isp: Isp },
    PauseQueue { isp: Isp },
    DisablePoolSources { isp: Isp },
    SetQueueBackoff { isp: Isp },
    SetQueueNormal { isp: Isp },
    ResumeQueue { isp: Isp },
    EnablePoolSources { isp: Isp },
    Reload,
}

impl MtaCommand {
    /// Full shell line for this command.
    pub fn render(&self) -> String {
        let body = match self {
            MtaCommand::DisableSource { ip, isp } => {
                format!("pmta disable source {} {}/*", ip, isp.name())
            }
            MtaCommand::PauseQueue { isp } => format!("pmta pause queue */{}", isp.pool_name()),
            MtaCommand::DisablePoolSources { isp } => {
                format!("pmta disable source * */{}", isp.pool_name())
            }
            MtaCommand::SetQueueBackoff { isp } => {
                format!("pmta set queue --mode=backoff */{}", isp.pool_name())
            }
            MtaCommand::SetQueueNormal { isp } => {
                format!("pmta set queue --mode=normal */{}", isp.pool_name())
            }
            MtaCommand::ResumeQueue { isp } => format!("pmta resume queue */{}", isp.pool_name()),
            MtaCommand::EnablePoolSources { isp } => {
                format!("pmta enable source * */{}", isp.pool_name())
            }
            MtaCommand::Reload => "pmta reload".to_string(),
        };
        format!("{}{}", SUDO_PREFIX, body)
    }
}
