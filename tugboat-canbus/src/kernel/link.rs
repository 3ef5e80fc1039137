//! Bringing a kernel CAN interface up at the right bit rate
//!
//! The OS is touched through the narrow [`LinkControl`] interface: query a link's state, set it
//! down, and set it up as a CAN link at a bit rate. [`IpLink`] implements it with the `ip` tool from
//! iproute2.
use core::future::Future;
use std::{path::PathBuf, process::ExitStatus};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio::process::Command;

/// Link kind reported for CAN interfaces
pub const CAN_LINK_KIND: &str = "can";

/// Error returned by link operations
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LinkError {
    /// No link with the given name exists
    #[snafu(display("No link found for {name}: {message}"))]
    NotFound {
        /// Interface name
        name: String,
        /// Diagnostic text from the OS
        message: String,
    },
    /// The link exists but is not a CAN link
    #[snafu(display("Invalid link type {kind:?} for {name}"))]
    InvalidKind {
        /// Interface name
        name: String,
        /// The reported link kind
        kind: String,
    },
    /// The link was still up after a successful down command
    #[snafu(display("Link {name} is still up after setting it down"))]
    StillUp {
        /// Interface name
        name: String,
    },
    /// The link control program could not be started
    #[snafu(display("Failed to run `{command}`: {source}"))]
    Spawn {
        /// The command line
        command: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The link control program reported failure
    #[snafu(display("`{command}` failed ({status}): {stderr}"))]
    CommandFailed {
        /// The command line
        command: String,
        /// Exit status of the command
        status: ExitStatus,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },
    /// The link details could not be understood
    #[snafu(display("Unable to parse link details for {name}: {source}"))]
    Parse {
        /// Interface name
        name: String,
        /// The JSON error
        source: serde_json::Error,
    },
}

/// A snapshot of a link's state
///
/// Always fetched fresh from the OS, never cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkState {
    /// Interface name
    pub name: String,
    /// Link kind, e.g. "can" or "vcan"
    pub kind: Option<String>,
    /// True if the link is administratively up
    pub is_up: bool,
    /// The configured bit rate, if the link reports one
    pub bit_rate: Option<u32>,
}

/// Access to OS network links
pub trait LinkControl: Send + Sync {
    /// Fetch the current state of the named link
    fn query(&self, name: &str) -> impl Future<Output = Result<LinkState, LinkError>> + Send;

    /// Bring the named link administratively down
    fn set_down(&self, name: &str) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Bring the named link up as a CAN link at `bit_rate`
    fn set_up(&self, name: &str, bit_rate: u32)
        -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// What [`bring_up`] had to do to the link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkTransition {
    /// The link was already up at the right bit rate
    Unchanged,
    /// The link was up and has been brought down and up again
    Bounced,
    /// The link was down and has been brought up
    BroughtUp,
}

async fn query_can_link<L: LinkControl>(link: &L, name: &str) -> Result<LinkState, LinkError> {
    let state = link.query(name).await?;
    if state.kind.as_deref() != Some(CAN_LINK_KIND) {
        return InvalidKindSnafu {
            name,
            kind: state.kind.unwrap_or_default(),
        }
        .fail();
    }
    Ok(state)
}

/// Make sure the named CAN link is up and running at `bit_rate`
///
/// A link which is already up at the right bit rate is left alone, unless `force_bounce` is set. A
/// link which is up at the wrong bit rate is brought down first, and then brought up at the new
/// rate. The result of the final up command is trusted, and not verified.
pub async fn bring_up<L: LinkControl>(
    link: &L,
    name: &str,
    bit_rate: u32,
    force_bounce: bool,
) -> Result<LinkTransition, LinkError> {
    let mut state = query_can_link(link, name).await?;
    let mut bounced = false;

    if state.is_up {
        if state.bit_rate != Some(bit_rate) {
            log::info!(
                "Link {name} currently has wrong bit rate {:?}, bringing down",
                state.bit_rate
            );
        } else if force_bounce {
            log::info!("Bouncing link {name}");
        } else {
            return Ok(LinkTransition::Unchanged);
        }

        link.set_down(name).await?;
        bounced = true;

        state = query_can_link(link, name).await?;
        if state.is_up {
            return StillUpSnafu { name }.fail();
        }
    }

    log::info!("Link {name} is down, bringing up at {bit_rate}");
    link.set_up(name, bit_rate).await?;

    Ok(if bounced {
        LinkTransition::Bounced
    } else {
        LinkTransition::BroughtUp
    })
}

#[derive(Debug, Deserialize)]
struct IpLinkDetails {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    info_kind: Option<String>,
    info_data: Option<IpCanInfo>,
}

#[derive(Debug, Deserialize)]
struct IpCanInfo {
    bittiming: Option<IpBitTiming>,
}

#[derive(Debug, Deserialize)]
struct IpBitTiming {
    bitrate: u32,
}

/// Interpret the output of `ip -details -json link show dev <name>`
pub(crate) fn parse_link_details(name: &str, json: &[u8]) -> Result<LinkState, LinkError> {
    let links: Vec<IpLinkDetails> = serde_json::from_slice(json).context(ParseSnafu { name })?;
    let Some(details) = links.into_iter().find(|l| l.ifname == name) else {
        return NotFoundSnafu {
            name,
            message: "not listed by ip",
        }
        .fail();
    };

    let is_up = details.flags.iter().any(|f| f == "UP");
    let (kind, bit_rate) = match details.linkinfo {
        Some(info) => (
            info.info_kind,
            info.info_data
                .and_then(|data| data.bittiming)
                .map(|timing| timing.bitrate),
        ),
        None => (None, None),
    };

    Ok(LinkState {
        name: details.ifname,
        kind,
        is_up,
        bit_rate,
    })
}

/// Diagnostic printed by `ip` when the named device does not exist
const NO_DEVICE_MESSAGE: &str = "does not exist";

/// Report a failed query as [`LinkError::NotFound`] when `ip` says there is no such device
fn missing_link_error(name: &str, error: LinkError) -> LinkError {
    match error {
        LinkError::CommandFailed { stderr, .. } if stderr.contains(NO_DEVICE_MESSAGE) => {
            LinkError::NotFound {
                name: name.to_string(),
                message: stderr,
            }
        }
        e => e,
    }
}

/// [`LinkControl`] implemented by running the iproute2 `ip` program
#[derive(Clone, Debug)]
pub struct IpLink {
    program: PathBuf,
}

impl Default for IpLink {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ip"),
        }
    }
}

impl IpLink {
    /// Use `ip` from the search path
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `ip` executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the program and return its stdout, failing on a non-zero exit
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, LinkError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .context(SpawnSnafu { command: &command })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::error!("`{command}` failed, output: {stdout:?}, stderr: {stderr:?}");
            return CommandFailedSnafu {
                command,
                status: output.status,
                stdout,
                stderr,
            }
            .fail();
        }
        Ok(output.stdout)
    }
}

impl LinkControl for IpLink {
    async fn query(&self, name: &str) -> Result<LinkState, LinkError> {
        let stdout = self
            .run(&["-details", "-json", "link", "show", "dev", name])
            .await
            .map_err(|e| missing_link_error(name, e))?;
        parse_link_details(name, &stdout)
    }

    async fn set_down(&self, name: &str) -> Result<(), LinkError> {
        self.run(&["link", "set", name, "down"]).await.map(|_| ())
    }

    async fn set_up(&self, name: &str, bit_rate: u32) -> Result<(), LinkError> {
        let bit_rate = bit_rate.to_string();
        self.run(&["link", "set", name, "up", "type", "can", "bitrate", &bit_rate])
            .await
            .map(|_| ())
    }
}
