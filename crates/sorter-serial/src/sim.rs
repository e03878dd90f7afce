//! 模拟控制器后端
//!
//! 在没有硬件时代替 MCU：解析写入的命令行，对运动命令（`T`）按
//! `|steps| × 2 × delay_us` 的时长（乘以时间缩放系数）安排一条
//! `T done steps=<n> id=<id>` 完成行。同一 STEP 引脚上的运动依次排队执行，
//! 不同引脚互不影响。
//!
//! [`SimHandle`] 可在端口交给命令总线后继续用于注入故障与检查写入记录。

use crate::{RxPort, SerialError, SerialPort, SplittablePort, TxPort};
use parking_lot::Mutex;
use sorter_protocol::{CommandId, MOTION_TAG};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 模拟参数
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// 运动时长缩放（1.0 为真实时长，测试中常用 0.01）
    pub time_scale: f64,
    /// 读超时
    pub read_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            read_timeout: Duration::from_millis(10),
        }
    }
}

/// 模拟器观察到的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// 收到一行命令
    Written {
        at: Instant,
        id: Option<CommandId>,
        line: String,
        motion: bool,
    },
    /// 运动命令完成（完成行已被读出）
    Completed { at: Instant, id: CommandId, ok: bool },
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    id: CommandId,
    ok: bool,
    line: String,
}

#[derive(Debug, Default)]
struct SimState {
    scheduled: Vec<Scheduled>,
    busy_until: HashMap<u8, Instant>,
    events: Vec<SimEvent>,
    fail_next: VecDeque<String>,
    drop_next: u32,
    injected: VecDeque<String>,
    steps: HashMap<u8, i64>,
    digital: HashMap<u8, i64>,
    servo: HashMap<u8, i64>,
    closed: bool,
}

/// 模拟器共享句柄
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    config: SimConfig,
}

fn field<T: std::str::FromStr>(fields: &[&str], idx: usize) -> Option<T> {
    fields.get(idx).and_then(|f| f.trim().parse().ok())
}

impl SimHandle {
    fn accept(&self, raw: &str) {
        let now = Instant::now();
        let text = raw.trim_end();
        let Some((head, payload)) = text.split_once('|') else {
            warn!("simulated controller: malformed line {:?}", text);
            self.state.lock().events.push(SimEvent::Written {
                at: now,
                id: None,
                line: text.to_string(),
                motion: false,
            });
            return;
        };
        let id: Option<CommandId> = head.parse().ok();
        let fields: Vec<&str> = payload.split(',').collect();
        let tag = fields.first().copied().unwrap_or("");
        let motion = tag == MOTION_TAG;

        let mut state = self.state.lock();
        state.events.push(SimEvent::Written {
            at: now,
            id,
            line: text.to_string(),
            motion,
        });

        match tag {
            MOTION_TAG => self.accept_motion(&mut state, now, id, &fields),
            "D" => {
                if let (Some(pin), Some(value)) = (field(&fields, 1), field(&fields, 2)) {
                    state.digital.insert(pin, value);
                }
            },
            "S" => {
                if let (Some(pin), Some(angle)) = (field(&fields, 1), field(&fields, 2)) {
                    state.servo.insert(pin, angle);
                }
            },
            _ => {},
        }
    }

    fn accept_motion(
        &self,
        state: &mut SimState,
        now: Instant,
        id: Option<CommandId>,
        fields: &[&str],
    ) {
        let (Some(id), Some(pin), Some(steps), Some(delay_us)) = (
            id,
            field::<u8>(fields, 1),
            field::<i64>(fields, 3),
            field::<u64>(fields, 4),
        ) else {
            warn!("simulated controller: malformed motion command {:?}", fields);
            return;
        };

        if let Some(detail) = state.fail_next.pop_front() {
            state.scheduled.push(Scheduled {
                due: now,
                id,
                ok: false,
                line: format!("ERR,{},{},{}", MOTION_TAG, id, detail),
            });
            return;
        }

        let nominal_us = steps.unsigned_abs().saturating_mul(2).saturating_mul(delay_us);
        let scaled = Duration::from_secs_f64(nominal_us as f64 / 1e6 * self.config.time_scale);
        let start = state
            .busy_until
            .get(&pin)
            .copied()
            .filter(|t| *t > now)
            .unwrap_or(now);
        let due = start + scaled;
        state.busy_until.insert(pin, due);
        *state.steps.entry(pin).or_insert(0) += steps;

        if state.drop_next > 0 {
            state.drop_next -= 1;
            debug!("simulated controller: dropping completion for id={}", id);
            return;
        }

        state.scheduled.push(Scheduled {
            due,
            id,
            ok: true,
            line: format!("T done steps={} id={}", steps, id),
        });
    }

    fn next_line(&self) -> Result<String, SerialError> {
        let deadline = Instant::now() + self.config.read_timeout;
        loop {
            let now = Instant::now();
            let next_due = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(SerialError::Closed);
                }
                if let Some(line) = state.injected.pop_front() {
                    return Ok(line);
                }
                let earliest = state
                    .scheduled
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.due)
                    .map(|(i, s)| (i, s.due));
                match earliest {
                    Some((idx, due)) if due <= now => {
                        let done = state.scheduled.swap_remove(idx);
                        state.events.push(SimEvent::Completed {
                            at: now,
                            id: done.id,
                            ok: done.ok,
                        });
                        return Ok(done.line);
                    },
                    Some((_, due)) => Some(due),
                    None => None,
                }
            };

            if now >= deadline {
                return Err(SerialError::Timeout);
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            std::thread::sleep(wake.saturating_duration_since(now).max(Duration::from_micros(200)));
        }
    }

    /// 下一条运动命令以 `ERR,T,<id>,<detail>` 失败
    pub fn fail_next_motion(&self, detail: impl Into<String>) {
        self.state.lock().fail_next.push_back(detail.into());
    }

    /// 接下来 `n` 条运动命令不回复完成行
    pub fn drop_next_completions(&self, n: u32) {
        self.state.lock().drop_next += n;
    }

    /// 注入一条任意上行行（立即可读）
    pub fn inject_line(&self, line: impl Into<String>) {
        self.state.lock().injected.push_back(line.into());
    }

    /// 关闭模拟器，后续读取返回 `SerialError::Closed`
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// 全部事件（按发生顺序）
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// 收到的命令行
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Written { line, .. } => Some(line.clone()),
                SimEvent::Completed { .. } => None,
            })
            .collect()
    }

    /// 某个 STEP 引脚累计执行的步数
    pub fn axis_steps(&self, step_pin: u8) -> i64 {
        self.state.lock().steps.get(&step_pin).copied().unwrap_or(0)
    }

    /// 数字输出的最后写入值
    pub fn digital_value(&self, pin: u8) -> Option<i64> {
        self.state.lock().digital.get(&pin).copied()
    }

    /// 舵机的最后角度
    pub fn servo_angle(&self, pin: u8) -> Option<i64> {
        self.state.lock().servo.get(&pin).copied()
    }

    /// 尚未回复的运动命令数量
    pub fn pending_completions(&self) -> usize {
        self.state.lock().scheduled.len()
    }
}

/// 模拟控制器
#[derive(Debug)]
pub struct SimulatedController {
    handle: SimHandle,
}

impl SimulatedController {
    pub fn new(config: SimConfig) -> Self {
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(SimState::default())),
                config,
            },
        }
    }

    /// 获取共享句柄
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SerialPort for SimulatedController {
    fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        if self.handle.state.lock().closed {
            return Err(SerialError::Closed);
        }
        self.handle.accept(line);
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, SerialError> {
        self.handle.next_line()
    }
}

/// 模拟器只读端
#[derive(Debug)]
pub struct SimRxPort {
    handle: SimHandle,
}

/// 模拟器只写端
#[derive(Debug)]
pub struct SimTxPort {
    handle: SimHandle,
}

impl RxPort for SimRxPort {
    fn read_line(&mut self) -> Result<String, SerialError> {
        self.handle.next_line()
    }
}

impl TxPort for SimTxPort {
    fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        if self.handle.state.lock().closed {
            return Err(SerialError::Closed);
        }
        self.handle.accept(line);
        Ok(())
    }
}

impl SplittablePort for SimulatedController {
    type RxPort = SimRxPort;
    type TxPort = SimTxPort;

    fn split(self) -> Result<(Self::RxPort, Self::TxPort), SerialError> {
        Ok((
            SimRxPort {
                handle: self.handle.clone(),
            },
            SimTxPort {
                handle: self.handle,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> SimulatedController {
        SimulatedController::new(SimConfig {
            time_scale: 0.001,
            read_timeout: Duration::from_millis(20),
        })
    }

    fn read_until_line(port: &mut SimulatedController) -> String {
        for _ in 0..100 {
            if let Some(line) = port.try_read_line().unwrap() {
                return line;
            }
        }
        panic!("no line from simulated controller");
    }

    #[test]
    fn test_motion_completes_with_id() {
        let mut port = fast();
        port.write_line("5|T,36,34,800,1000,2000,24,24\n").unwrap();
        assert_eq!(read_until_line(&mut port), "T done steps=800 id=5");
        assert_eq!(port.handle().axis_steps(36), 800);
    }

    #[test]
    fn test_non_motion_has_no_reply() {
        let mut port = fast();
        port.write_line("1|D,30,0\n").unwrap();
        port.write_line("2|S,5,72\n").unwrap();
        assert!(matches!(port.read_line(), Err(SerialError::Timeout)));
        assert_eq!(port.handle().digital_value(30), Some(0));
        assert_eq!(port.handle().servo_angle(5), Some(72));
    }

    #[test]
    fn test_injected_failure() {
        let mut port = fast();
        port.handle().fail_next_motion("stall");
        port.write_line("9|T,36,34,10,1000,2000,24,24\n").unwrap();
        assert_eq!(read_until_line(&mut port), "ERR,T,9,stall");
    }

    #[test]
    fn test_dropped_completion() {
        let mut port = fast();
        port.handle().drop_next_completions(1);
        port.write_line("3|T,36,34,1,400,800,24,24\n").unwrap();
        assert!(matches!(port.read_line(), Err(SerialError::Timeout)));
        assert_eq!(port.handle().pending_completions(), 0);
    }

    #[test]
    fn test_same_pin_motions_are_sequential() {
        let mut port = fast();
        port.write_line("1|T,36,34,1000,1000,2000,24,24\n").unwrap();
        port.write_line("2|T,36,34,10,1000,2000,24,24\n").unwrap();
        assert_eq!(read_until_line(&mut port), "T done steps=1000 id=1");
        assert_eq!(read_until_line(&mut port), "T done steps=10 id=2");
    }

    #[test]
    fn test_closed_port() {
        let mut port = fast();
        port.handle().close();
        assert!(matches!(port.read_line(), Err(SerialError::Closed)));
        assert!(matches!(port.write_line("1|D,1,1\n"), Err(SerialError::Closed)));
    }

    #[test]
    fn test_split_shares_state() {
        let port = fast();
        let handle = port.handle();
        let (mut rx, mut tx) = port.split().unwrap();
        tx.write_line("4|T,2,3,1,100,200,0,0\n").unwrap();
        let mut got = None;
        for _ in 0..100 {
            if let Ok(line) = rx.read_line() {
                got = Some(line);
                break;
            }
        }
        assert_eq!(got.as_deref(), Some("T done steps=1 id=4"));
        assert_eq!(handle.written_lines(), vec!["4|T,2,3,1,100,200,0,0".to_string()]);
    }
}
