//! 인메모리 인터페이스
//!
//! 실제 TUN 장치 없이 포워드 루프를 구동합니다. [`MemoryInterface`]는 루프에
//! 넘기고, 짝이 되는 [`MemoryInterfaceHandle`]로 프레임을 주입하고 포워딩된
//! 프레임을 확인합니다.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::tun::{ReadOutcome, TunInterface};

#[derive(Default)]
struct Shared {
    inbound: VecDeque<Bytes>,
    forwarded: Vec<Bytes>,
    read_error: Option<io::ErrorKind>,
    fail_writes: bool,
    end_of_stream: bool,
    invalid: bool,
    closed: bool,
}

/// 테스트/드라이런용 인터페이스
pub struct MemoryInterface {
    name: String,
    shared: Arc<Mutex<Shared>>,
}

/// [`MemoryInterface`] 제어 핸들
#[derive(Clone)]
pub struct MemoryInterfaceHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryInterface {
    pub fn new(name: impl Into<String>) -> (Self, MemoryInterfaceHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                name: name.into(),
                shared: Arc::clone(&shared),
            },
            MemoryInterfaceHandle { shared },
        )
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TunInterface for MemoryInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut shared = self.lock();
        if shared.closed {
            return Ok(ReadOutcome::Closed);
        }
        if let Some(kind) = shared.read_error.take() {
            return Err(io::Error::new(kind, "injected read failure"));
        }
        match shared.inbound.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(ReadOutcome::Data(n))
            }
            None if shared.end_of_stream => Ok(ReadOutcome::Closed),
            None => Ok(ReadOutcome::Empty),
        }
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let mut shared = self.lock();
        if shared.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "interface closed"));
        }
        if shared.fail_writes {
            return Err(io::Error::other("injected write failure"));
        }
        shared.forwarded.push(Bytes::copy_from_slice(frame));
        Ok(frame.len())
    }

    fn is_valid(&self) -> bool {
        let shared = self.lock();
        !shared.invalid && !shared.closed
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}

impl MemoryInterfaceHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 읽기 대기열에 프레임을 넣습니다.
    pub fn inject(&self, frame: impl Into<Bytes>) {
        self.lock().inbound.push_back(frame.into());
    }

    /// 대기열이 비면 스트림 종료를 보고합니다.
    pub fn finish(&self) {
        self.lock().end_of_stream = true;
    }

    /// 다음 읽기를 `kind` 에러로 실패시킵니다.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.lock().read_error = Some(kind);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// 유효성 검사를 실패하게 만듭니다.
    pub fn invalidate(&self) {
        self.lock().invalid = true;
    }

    /// 인터페이스로 다시 쓴 프레임들
    pub fn forwarded(&self) -> Vec<Bytes> {
        self.lock().forwarded.clone()
    }

    pub fn forwarded_count(&self) -> usize {
        self.lock().forwarded.len()
    }

    pub fn pending(&self) -> usize {
        self.lock().inbound.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
