//! 驱动卡注册表
//!
//! 每个 `(device, module)` 只创建一个 [`MotorDriverCard`]。注册表在进程启动时构造一次，
//! 以 `Arc` 传给需要它的调用者。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::card::MotorDriverCard;
use crate::error::DriverError;

#[derive(Default)]
pub struct CardRegistry {
    cards: Mutex<HashMap<(String, String), Arc<MotorDriverCard>>>,
}

impl CardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &str, module: &str) -> Option<Arc<MotorDriverCard>> {
        self.cards
            .lock()
            .get(&(device.to_string(), module.to_string()))
            .cloned()
    }

    /// 返回已有的卡，或用 `open` 创建并登记
    ///
    /// 创建过程在注册表锁内完成，并发调用者不会创建第二个实例。
    pub fn get_or_open<F>(
        &self,
        device: &str,
        module: &str,
        open: F,
    ) -> Result<Arc<MotorDriverCard>, DriverError>
    where
        F: FnOnce() -> Result<MotorDriverCard, DriverError>,
    {
        let mut cards = self.cards.lock();
        let key = (device.to_string(), module.to_string());
        if let Some(card) = cards.get(&key) {
            return Ok(Arc::clone(card));
        }

        debug!("Opening motor driver card {}/{}", device, module);
        let card = Arc::new(open()?);
        cards.insert(key, Arc::clone(&card));
        Ok(card)
    }

    pub fn remove(&self, device: &str, module: &str) -> Option<Arc<MotorDriverCard>> {
        self.cards
            .lock()
            .remove(&(device.to_string(), module.to_string()))
    }

    pub fn len(&self) -> usize {
        self.cards.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.lock().is_empty()
    }
}
