use std::{
    collections::HashMap,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    sync::{Arc, Mutex},
};

use tokio::sync::Semaphore;
use tugboat_canbus::kernel::{LinkControl, LinkError, LinkState};

/// A mutation requested through the link controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkCommand {
    Down(String),
    Up(String, u32),
}

#[derive(Debug, Clone)]
struct SimLinkEntry {
    kind: String,
    is_up: bool,
    bit_rate: Option<u32>,
}

#[derive(Debug, Default)]
struct SimLinkInner {
    links: HashMap<String, SimLinkEntry>,
    commands: Vec<LinkCommand>,
    fail_down: bool,
    fail_up: bool,
    ignore_down: bool,
    queries: usize,
    gate: Option<Arc<Semaphore>>,
}

/// In-memory set of network links which records every command issued to it
#[derive(Debug, Clone, Default)]
pub struct SimLink {
    inner: Arc<Mutex<SimLinkInner>>,
}

fn command_failed(command: String) -> LinkError {
    LinkError::CommandFailed {
        command,
        status: ExitStatus::from_raw(2 << 8),
        stdout: String::new(),
        stderr: "RTNETLINK answers: Operation not permitted".into(),
    }
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CAN link
    pub fn add_can_link(&self, name: &str, is_up: bool, bit_rate: Option<u32>) {
        self.add_link(name, "can", is_up, bit_rate);
    }

    pub fn add_link(&self, name: &str, kind: &str, is_up: bool, bit_rate: Option<u32>) {
        self.inner.lock().unwrap().links.insert(
            name.to_string(),
            SimLinkEntry {
                kind: kind.to_string(),
                is_up,
                bit_rate,
            },
        );
    }

    /// Make subsequent down commands fail
    pub fn fail_down(&self) {
        self.inner.lock().unwrap().fail_down = true;
    }

    /// Make subsequent up commands fail
    pub fn fail_up(&self) {
        self.inner.lock().unwrap().fail_up = true;
    }

    /// Make down commands report success without changing the link
    pub fn ignore_down(&self) {
        self.inner.lock().unwrap().ignore_down = true;
    }

    /// Make queries wait until [`SimLink::release_queries`] is called
    pub fn hold_queries(&self) {
        self.inner.lock().unwrap().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_queries(&self) {
        if let Some(gate) = self.inner.lock().unwrap().gate.take() {
            gate.close();
        }
    }

    /// Number of queries started so far, including held ones
    pub fn query_count(&self) -> usize {
        self.inner.lock().unwrap().queries
    }

    /// All commands issued so far, in order
    pub fn commands(&self) -> Vec<LinkCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn state(&self, name: &str) -> Option<LinkState> {
        let inner = self.inner.lock().unwrap();
        inner.links.get(name).map(|entry| LinkState {
            name: name.to_string(),
            kind: Some(entry.kind.clone()),
            is_up: entry.is_up,
            bit_rate: entry.bit_rate,
        })
    }
}

impl LinkControl for SimLink {
    async fn query(&self, name: &str) -> Result<LinkState, LinkError> {
        let gate = {
            let mut inner = self.inner.lock().unwrap();
            inner.queries += 1;
            inner.gate.clone()
        };
        if let Some(gate) = gate {
            // Fails once the gate is closed by release_queries
            let _ = gate.acquire().await;
        }
        self.state(name).ok_or_else(|| LinkError::NotFound {
            name: name.to_string(),
            message: format!("Device \"{name}\" does not exist."),
        })
    }

    async fn set_down(&self, name: &str) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(LinkCommand::Down(name.to_string()));
        if inner.fail_down {
            return Err(command_failed(format!("ip link set {name} down")));
        }
        let ignore = inner.ignore_down;
        if let Some(entry) = inner.links.get_mut(name) {
            if !ignore {
                entry.is_up = false;
            }
        }
        Ok(())
    }

    async fn set_up(&self, name: &str, bit_rate: u32) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .commands
            .push(LinkCommand::Up(name.to_string(), bit_rate));
        if inner.fail_up {
            return Err(command_failed(format!(
                "ip link set {name} up type can bitrate {bit_rate}"
            )));
        }
        if let Some(entry) = inner.links.get_mut(name) {
            entry.is_up = true;
            entry.bit_rate = Some(bit_rate);
        }
        Ok(())
    }
}
