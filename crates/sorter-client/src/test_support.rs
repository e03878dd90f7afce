//! 单元测试用的脚本化命令出口

use parking_lot::Mutex;
use sorter_driver::{CommandSink, DriverError};
use sorter_protocol::{CommandId, ControllerCommand};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Fire(ControllerCommand),
    Blocking(ControllerCommand, Duration),
}

impl Sent {
    pub fn command(&self) -> &ControllerCommand {
        match self {
            Sent::Fire(cmd) | Sent::Blocking(cmd, _) => cmd,
        }
    }
}

/// 记录所有命令；阻塞命令按脚本依次返回结果，脚本用完后一律成功
#[derive(Default)]
pub struct ScriptedSink {
    sent: Mutex<Vec<Sent>>,
    script: Mutex<VecDeque<Result<String, DriverError>>>,
    next_id: Mutex<CommandId>,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&self, result: Result<String, DriverError>) {
        self.script.lock().push_back(result);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn commands(&self) -> Vec<ControllerCommand> {
        self.sent.lock().iter().map(|s| s.command().clone()).collect()
    }

    pub fn blocking_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| matches!(s, Sent::Blocking(..)))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn allocate(&self) -> CommandId {
        let mut id = self.next_id.lock();
        *id += 1;
        *id
    }
}

impl CommandSink for ScriptedSink {
    fn submit(&self, command: ControllerCommand) -> Result<CommandId, DriverError> {
        self.sent.lock().push(Sent::Fire(command));
        Ok(self.allocate())
    }

    fn submit_blocking(
        &self,
        command: ControllerCommand,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        self.sent.lock().push(Sent::Blocking(command, timeout));
        let id = self.allocate();
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(format!("T done id={}", id)),
        }
    }

    fn is_running(&self) -> bool {
        true
    }
}
