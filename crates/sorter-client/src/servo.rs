//! 层门舵机
//!
//! 每层料仓入口有一扇由舵机驱动的门。门关闭时零件沿滑槽落入本层，
//! 门打开时零件穿过本层继续下落。

use crate::error::ClientError;
use sorter_driver::CommandSink;
use sorter_protocol::ControllerCommand;
use sorter_tools::{DoorSection, MachineStore};
use std::sync::Arc;
use tracing::info;

/// 门的开/关角度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorAngles {
    pub open: i32,
    pub closed: i32,
}

impl Default for DoorAngles {
    fn default() -> Self {
        Self { open: 0, closed: 72 }
    }
}

impl From<&DoorSection> for DoorAngles {
    fn from(section: &DoorSection) -> Self {
        Self {
            open: section.open_angle,
            closed: section.closed_angle,
        }
    }
}

pub struct Servo {
    name: String,
    pin: u8,
    angle: i32,
    angles: DoorAngles,
    sink: Arc<dyn CommandSink>,
    store: Arc<dyn MachineStore>,
}

impl Servo {
    /// 恢复持久化角度（缺省为打开位置）并把舵机驱动到该角度
    pub fn new(
        name: impl Into<String>,
        pin: u8,
        angles: DoorAngles,
        sink: Arc<dyn CommandSink>,
        store: Arc<dyn MachineStore>,
    ) -> Result<Self, ClientError> {
        let name = name.into();
        let angle = store.servo_angle(&name).unwrap_or(angles.open);
        info!("Initialized servo '{}' on pin {}, position={}°", name, pin, angle);
        sink.submit(ControllerCommand::ServoAngle { pin, angle })?;
        Ok(Self {
            name,
            pin,
            angle,
            angles,
            sink,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn angle(&self) -> i32 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: i32) -> Result<(), ClientError> {
        info!("Servo '{}' moving to {}°", self.name, angle);
        self.sink.submit(ControllerCommand::ServoAngle {
            pin: self.pin,
            angle,
        })?;
        self.angle = angle;
        self.store.set_servo_angle(&self.name, angle)?;
        Ok(())
    }

    pub fn open(&mut self) -> Result<(), ClientError> {
        self.set_angle(self.angles.open)
    }

    pub fn close(&mut self) -> Result<(), ClientError> {
        self.set_angle(self.angles.closed)
    }

    /// 打开状态则关闭，否则打开
    pub fn toggle(&mut self) -> Result<(), ClientError> {
        if self.is_open() { self.close() } else { self.open() }
    }

    pub fn is_open(&self) -> bool {
        self.angle == self.angles.open
    }

    pub fn is_closed(&self) -> bool {
        self.angle == self.angles.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSink;
    use sorter_tools::MemoryStore;

    #[test]
    fn test_restores_persisted_angle() {
        let sink = Arc::new(ScriptedSink::new());
        let store = Arc::new(MemoryStore::new());
        store.set_servo_angle("layer_1", 72).unwrap();

        let servo = Servo::new("layer_1", 5, DoorAngles::default(), sink.clone(), store).unwrap();
        assert!(servo.is_closed());
        assert_eq!(
            sink.commands(),
            vec![ControllerCommand::ServoAngle { pin: 5, angle: 72 }]
        );
    }

    #[test]
    fn test_toggle_and_persist() {
        let sink = Arc::new(ScriptedSink::new());
        let store = Arc::new(MemoryStore::new());
        let mut servo =
            Servo::new("layer_0", 4, DoorAngles::default(), sink.clone(), store.clone()).unwrap();
        assert!(servo.is_open());

        servo.toggle().unwrap();
        assert!(servo.is_closed());
        assert_eq!(store.servo_angle("layer_0"), Some(72));

        servo.toggle().unwrap();
        assert!(servo.is_open());
        assert_eq!(store.servo_angle("layer_0"), Some(0));
    }

    #[test]
    fn test_intermediate_angle_is_neither() {
        let sink = Arc::new(ScriptedSink::new());
        let store = Arc::new(MemoryStore::new());
        let mut servo = Servo::new("layer_2", 6, DoorAngles::default(), sink, store).unwrap();
        servo.set_angle(30).unwrap();
        assert!(!servo.is_open());
        assert!(!servo.is_closed());
    }
}
