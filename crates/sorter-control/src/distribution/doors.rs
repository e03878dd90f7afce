use sorter_client::{ClientError, Servo};
use tracing::info;

/// 每层一扇门，按层号排列
pub struct DoorBank {
    servos: Vec<Servo>,
}

impl DoorBank {
    pub fn new(servos: Vec<Servo>) -> Self {
        Self { servos }
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }

    pub fn get(&self, layer: usize) -> Option<&Servo> {
        self.servos.get(layer)
    }

    /// 关闭目标层的门
    ///
    /// 目标门原本打开时，先打开其他所有已关闭的门，零件才能落到目标层。
    ///
    /// # 错误
    /// - `ClientError::InvalidLayout`: 没有这一层的门
    pub fn select(&mut self, layer: usize) -> Result<(), ClientError> {
        let target_closed = self
            .servos
            .get(layer)
            .map(Servo::is_closed)
            .ok_or_else(|| {
                ClientError::InvalidLayout(format!(
                    "no door for layer {} ({} doors)",
                    layer,
                    self.servos.len()
                ))
            })?;

        if !target_closed {
            for (index, servo) in self.servos.iter_mut().enumerate() {
                if index != layer && servo.is_closed() {
                    servo.open()?;
                }
            }
        }
        info!("Selecting door for layer {}", layer);
        self.servos[layer].close()
    }
}
