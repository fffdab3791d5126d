use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use craftlink_bridge_protocol::AgentTurn;
use serde_json::Value;

use crate::agent::{Agent, AgentError};
use crate::{FrameSink, LinkError};

#[derive(Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn disconnect(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames.lock().expect("frames lock").clone()
    }

    /// `(requestId, commandLine)` for every command request sent so far.
    pub(crate) fn command_requests(&self) -> Vec<(String, String)> {
        self.frames()
            .iter()
            .filter_map(|frame| serde_json::from_str::<Value>(frame).ok())
            .filter(|value| value["header"]["messagePurpose"] == "commandRequest")
            .map(|value| {
                (
                    value["header"]["requestId"].as_str().unwrap_or_default().to_string(),
                    value["body"]["commandLine"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Chat text carried by the `tellraw` commands, one entry per frame.
    pub(crate) fn chat_lines(&self) -> Vec<String> {
        self.command_requests()
            .into_iter()
            .filter_map(|(_, line)| {
                let raw = line.strip_prefix("tellraw @a ")?;
                let value: Value = serde_json::from_str(raw).ok()?;
                value["rawtext"][0]["text"].as_str().map(ToString::to_string)
            })
            .collect()
    }
}

impl FrameSink for RecordingSink {
    fn send_text(&self, frame: String) -> Result<(), LinkError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        self.frames.lock().expect("frames lock").push(frame);
        Ok(())
    }
}

/// Plays back queued turns and records what it was asked.
pub(crate) struct ScriptedAgent {
    user_turns: Mutex<VecDeque<AgentTurn>>,
    result_turns: Mutex<VecDeque<AgentTurn>>,
    user_calls: Mutex<Vec<String>>,
    result_calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedAgent {
    pub(crate) fn new(user_turns: Vec<AgentTurn>, result_turns: Vec<AgentTurn>) -> Self {
        Self {
            user_turns: Mutex::new(user_turns.into()),
            result_turns: Mutex::new(result_turns.into()),
            user_calls: Mutex::new(Vec::new()),
            result_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn user_calls(&self) -> Vec<String> {
        self.user_calls.lock().expect("user calls lock").clone()
    }

    pub(crate) fn result_calls(&self) -> Vec<Vec<String>> {
        self.result_calls.lock().expect("result calls lock").clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn process_user_message(&self, text: &str) -> Result<AgentTurn, AgentError> {
        self.user_calls
            .lock()
            .expect("user calls lock")
            .push(text.to_string());
        Ok(self
            .user_turns
            .lock()
            .expect("user turns lock")
            .pop_front()
            .unwrap_or_default())
    }

    async fn process_command_results(&self, results: &[String]) -> Result<AgentTurn, AgentError> {
        self.result_calls
            .lock()
            .expect("result calls lock")
            .push(results.to_vec());
        Ok(self
            .result_turns
            .lock()
            .expect("result turns lock")
            .pop_front()
            .unwrap_or_default())
    }
}

pub(crate) async fn wait_for(mut check: impl FnMut() -> bool) {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), poll)
        .await
        .expect("condition not reached in time");
}
