//! A scriptable in-memory session for tests.
//!
//! Commands are recorded in order; replies are served from per-command
//! scripts. `print(...)` queries are answered from a stub table so a test can
//! declare the firmware state once and let the meter read it any number of
//! times, while one-shot scripted replies take precedence for sequenced
//! interactions.

use super::{DeviceError, ServiceRequests, Session};
use crate::error::{TtmError, TtmResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct MockSession {
    resource_name: String,
    /// Every command line written, in order.
    command_log: Vec<String>,
    /// One-shot replies keyed by the exact command line.
    scripted: HashMap<String, VecDeque<String>>,
    /// Sticky replies keyed by the exact command line; consulted after the
    /// one-shot scripts run dry.
    stubs: HashMap<String, String>,
    /// Replies queued for the next reads.
    pending: VecDeque<String>,
    status_byte: ServiceRequests,
    device_errors: VecDeque<DeviceError>,
    trigger_asserts: usize,
    /// When set, asserting a trigger raises the message-available bit and
    /// queues this completion line, imitating the firmware's wait loop
    /// printing its handshake once it is unblocked.
    assert_unblocks_with: Option<String>,
}

impl MockSession {
    pub fn new(resource_name: &str) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            ..Self::default()
        }
    }

    /// Declare a sticky reply for `print(<expr>)`.
    pub fn stub_print(&mut self, expr: &str, reply: &str) {
        self.stubs
            .insert(format!("print({expr})"), reply.to_string());
    }

    /// Queue a one-shot reply for an exact command line.
    pub fn script_reply(&mut self, command: &str, reply: &str) {
        self.scripted
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    pub fn set_status_byte(&mut self, status: ServiceRequests) {
        self.status_byte = status;
    }

    pub fn raise_message_available(&mut self, reply: &str) {
        self.status_byte |= ServiceRequests::MESSAGE_AVAILABLE;
        self.pending.push_back(reply.to_string());
    }

    pub fn queue_device_error(&mut self, code: i64, message: &str) {
        self.status_byte |= ServiceRequests::ERROR_AVAILABLE;
        self.device_errors.push_back(DeviceError {
            code,
            message: message.to_string(),
        });
    }

    /// Make a hardware trigger assert unblock the firmware wait loop.
    pub fn unblock_on_assert(&mut self, completion_reply: &str) {
        self.assert_unblocks_with = Some(completion_reply.to_string());
    }

    pub fn command_log(&self) -> &[String] {
        &self.command_log
    }

    pub fn wrote(&self, command: &str) -> bool {
        self.command_log.iter().any(|line| line == command)
    }

    pub fn trigger_asserts(&self) -> usize {
        self.trigger_asserts
    }
}

#[async_trait]
impl Session for MockSession {
    fn resource_name(&self) -> &str {
        &self.resource_name
    }

    async fn write_line(&mut self, command: &str) -> TtmResult<usize> {
        self.command_log.push(command.to_string());
        let reply = match self.scripted.get_mut(command).and_then(VecDeque::pop_front) {
            Some(reply) => Some(reply),
            None => self.stubs.get(command).cloned(),
        };
        if let Some(reply) = reply {
            self.pending.push_back(reply);
        }
        Ok(command.len() + 1)
    }

    async fn read_line_trim_end(&mut self) -> TtmResult<String> {
        match self.pending.pop_front() {
            Some(reply) => {
                if self.pending.is_empty() {
                    self.status_byte -= ServiceRequests::MESSAGE_AVAILABLE;
                }
                Ok(reply)
            }
            None => Err(TtmError::Session(format!(
                "no reply scripted for read; last command: {:?}",
                self.command_log.last()
            ))),
        }
    }

    async fn read_status_byte(&mut self) -> TtmResult<ServiceRequests> {
        Ok(self.status_byte)
    }

    async fn assert_trigger(&mut self) -> TtmResult<()> {
        self.trigger_asserts += 1;
        if let Some(reply) = self.assert_unblocks_with.clone() {
            self.raise_message_available(&reply);
        }
        Ok(())
    }

    async fn next_device_error(&mut self) -> TtmResult<Option<DeviceError>> {
        let error = self.device_errors.pop_front();
        if self.device_errors.is_empty() {
            self.status_byte -= ServiceRequests::ERROR_AVAILABLE;
        }
        Ok(error)
    }
}
