//! SPI 握手传输
//!
//! 通过三个卡上寄存器与芯片通信：写寄存器、同步寄存器、可选的读回寄存器。
//!
//! # 单次事务
//!
//! 1. 向同步寄存器写入 `SYNC_REQUESTED`
//! 2. 向写寄存器写入数据字
//! 3. 轮询同步寄存器（读、等待、再读），最多 `poll_count` 次
//! 4. 仍为 `SYNC_REQUESTED` 时从第 1 步重试，总共最多 `max_attempts` 次
//! 5. `SYNC_OK` 成功；重试耗尽为 `HandshakeTimeout`；其它值立即返回 `HandshakeFault`
//!
//! 三个寄存器是同一份硬件资源，所有事务由传输内部的锁串行化。

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backend::ScalarRegister;
use crate::error::DriverError;

pub const SYNC_OK: i32 = 0x00;
pub const SYNC_REQUESTED: i32 = 0xFF;
pub const SYNC_ERROR: i32 = 0xAA;

/// 默认最大尝试次数
pub const MAX_ATTEMPTS: u32 = 3;

/// 单次事务内的握手状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    SyncRequested,
    Ok,
    Error,
}

impl HandshakeState {
    /// 按同步寄存器的值分类（未知值归入错误类）
    pub fn from_sync_value(value: i32) -> Self {
        match value {
            SYNC_OK => HandshakeState::Ok,
            SYNC_REQUESTED => HandshakeState::SyncRequested,
            _ => HandshakeState::Error,
        }
    }
}

/// 握手时序参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTiming {
    /// 两次轮询之间的等待时间
    pub waiting_time: Duration,
    /// 每次尝试的轮询次数
    pub poll_count: u32,
    /// 最大尝试次数
    pub max_attempts: u32,
}

impl SpiTiming {
    pub fn new(waiting_time: Duration, poll_count: u32) -> Self {
        Self {
            waiting_time,
            poll_count,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl Default for SpiTiming {
    fn default() -> Self {
        Self::new(Duration::from_micros(40), 10)
    }
}

/// 握手传输
pub struct HandshakeTransport {
    write: ScalarRegister,
    sync: ScalarRegister,
    readback: Option<ScalarRegister>,
    timing: SpiTiming,
    lock: Mutex<()>,
}

impl HandshakeTransport {
    pub fn new(
        write: ScalarRegister,
        sync: ScalarRegister,
        readback: Option<ScalarRegister>,
        timing: SpiTiming,
    ) -> Self {
        Self {
            write,
            sync,
            readback,
            timing,
            lock: Mutex::new(()),
        }
    }

    pub fn timing(&self) -> SpiTiming {
        self.timing
    }

    pub fn has_readback(&self) -> bool {
        self.readback.is_some()
    }

    /// 写一个数据字
    pub fn write(&self, word: u32) -> Result<(), DriverError> {
        let _guard = self.lock.lock();
        self.transact(word)
    }

    /// 写一个数据字，并在同一把锁内读回应答
    ///
    /// # 错误
    ///
    /// - `DriverError::NotSupported`: 传输没有读回寄存器
    pub fn read(&self, word: u32) -> Result<u32, DriverError> {
        let readback = self.readback.as_ref().ok_or_else(|| {
            DriverError::NotSupported(format!("readback over {}", self.write.path()))
        })?;

        let _guard = self.lock.lock();
        self.transact(word)?;
        readback.read_bits()
    }

    fn transact(&self, word: u32) -> Result<(), DriverError> {
        for attempt in 1..=self.timing.max_attempts {
            self.sync.write(SYNC_REQUESTED)?;
            self.write.write_bits(word)?;

            let value = self.wait_for_sync()?;
            match HandshakeState::from_sync_value(value) {
                HandshakeState::Ok => {
                    trace!("SPI word 0x{:08X} via {} acknowledged", word, self.write.path());
                    return Ok(());
                },
                HandshakeState::SyncRequested => {
                    warn!(
                        "SPI handshake on {} not finished (attempt {}/{}), retrying",
                        self.sync.path(),
                        attempt,
                        self.timing.max_attempts
                    );
                },
                HandshakeState::Error | HandshakeState::Idle => {
                    error!(
                        "SPI handshake fault on {}: sync value 0x{:02X}",
                        self.sync.path(),
                        value
                    );
                    return Err(DriverError::HandshakeFault {
                        register: self.sync.path().to_string(),
                        value: value as u32,
                    });
                },
            }
        }

        error!(
            "SPI handshake timeout on {} after {} attempts",
            self.sync.path(),
            self.timing.max_attempts
        );
        Err(DriverError::HandshakeTimeout {
            register: self.sync.path().to_string(),
            attempts: self.timing.max_attempts,
        })
    }

    /// 轮询同步寄存器，返回最后读到的值
    fn wait_for_sync(&self) -> Result<i32, DriverError> {
        let mut value = self.sync.read()?;
        let mut polls = 0;
        while value == SYNC_REQUESTED && polls < self.timing.poll_count {
            thread::sleep(self.timing.waiting_time);
            value = self.sync.read()?;
            polls += 1;
        }
        if polls > 0 {
            debug!("SPI sync on {} settled after {} polls", self.sync.path(), polls);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RegisterBackend;
    use crate::error::BackendError;
    use std::sync::Arc;

    /// 按脚本应答的后端：前 `stalled` 次写入不应答，之后写入 `answer`
    struct ScriptedBackend {
        state: Mutex<Script>,
    }

    struct Script {
        stalled: u32,
        answer: i32,
        sync: i32,
        written: Vec<u32>,
        readback: i32,
    }

    impl ScriptedBackend {
        fn new(stalled: u32, answer: i32) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(Script {
                    stalled,
                    answer,
                    sync: SYNC_OK,
                    written: Vec::new(),
                    readback: 0x1234,
                }),
            })
        }
    }

    impl RegisterBackend for ScriptedBackend {
        fn read(&self, path: &str) -> Result<i32, BackendError> {
            let state = self.state.lock();
            match path {
                "T/SYNC" => Ok(state.sync),
                "T/READBACK" => Ok(state.readback),
                _ => Err(BackendError::NotFound(path.to_string())),
            }
        }

        fn write(&self, path: &str, value: i32) -> Result<(), BackendError> {
            let mut state = self.state.lock();
            match path {
                "T/SYNC" => state.sync = value,
                "T/WRITE" => {
                    state.written.push(value as u32);
                    if state.stalled > 0 {
                        state.stalled -= 1;
                    } else {
                        state.sync = state.answer;
                    }
                },
                _ => return Err(BackendError::NotFound(path.to_string())),
            }
            Ok(())
        }

        fn contains(&self, path: &str) -> bool {
            matches!(path, "T/SYNC" | "T/WRITE" | "T/READBACK")
        }
    }

    fn make_transport(script: &Arc<ScriptedBackend>, with_readback: bool) -> HandshakeTransport {
        let backend: Arc<dyn RegisterBackend> = script.clone();
        let readback = if with_readback {
            Some(ScalarRegister::open(&backend, "T", "READBACK").unwrap())
        } else {
            None
        };
        HandshakeTransport::new(
            ScalarRegister::open(&backend, "T", "WRITE").unwrap(),
            ScalarRegister::open(&backend, "T", "SYNC").unwrap(),
            readback,
            SpiTiming::new(Duration::ZERO, 2),
        )
    }

    #[test]
    fn test_sync_value_classification() {
        assert_eq!(HandshakeState::from_sync_value(0x00), HandshakeState::Ok);
        assert_eq!(HandshakeState::from_sync_value(0xFF), HandshakeState::SyncRequested);
        assert_eq!(HandshakeState::from_sync_value(0xAA), HandshakeState::Error);
        assert_eq!(HandshakeState::from_sync_value(0x17), HandshakeState::Error);
    }

    /// 测试 3 次中 2 次未应答时仍然成功
    #[test]
    fn test_two_stalled_attempts_then_success() {
        let script = ScriptedBackend::new(2, SYNC_OK);
        let transport = make_transport(&script, false);

        transport.write(0xABCD).unwrap();
        assert_eq!(script.state.lock().written, vec![0xABCD; 3]);
    }

    /// 测试 3 次全部未应答时超时
    #[test]
    fn test_all_attempts_stalled_times_out() {
        let script = ScriptedBackend::new(3, SYNC_OK);
        let transport = make_transport(&script, false);

        let err = transport.write(0x1).unwrap_err();
        assert_eq!(
            err,
            DriverError::HandshakeTimeout {
                register: "T/SYNC".to_string(),
                attempts: 3
            }
        );
    }

    /// 测试错误值立即返回，不重试
    #[test]
    fn test_fault_is_not_retried() {
        let script = ScriptedBackend::new(0, SYNC_ERROR);
        let transport = make_transport(&script, false);

        let err = transport.write(0x1).unwrap_err();
        assert!(matches!(err, DriverError::HandshakeFault { value: 0xAA, .. }));
        assert_eq!(script.state.lock().written.len(), 1);

        let script = ScriptedBackend::new(0, 0x42);
        let err = make_transport(&script, false).write(0x1).unwrap_err();
        assert!(matches!(err, DriverError::HandshakeFault { value: 0x42, .. }));
    }

    #[test]
    fn test_read_uses_readback_register() {
        let script = ScriptedBackend::new(1, SYNC_OK);
        let transport = make_transport(&script, true);
        assert_eq!(transport.read(0x7300_0000).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_without_readback_is_not_supported() {
        let script = ScriptedBackend::new(0, SYNC_OK);
        let transport = make_transport(&script, false);
        assert!(matches!(transport.read(0), Err(DriverError::NotSupported(_))));
        assert!(script.state.lock().written.is_empty());
    }
}
