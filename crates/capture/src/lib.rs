#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`tun`]: 인터페이스 trait과 Unix descriptor 구현 (Linux TUN 장치 열기 포함)
//! - [`memory`]: 실제 장치 없이 쓰는 인메모리 인터페이스
//! - [`forward`]: 전용 스레드 포워드 루프와 실시간 카운터
//! - [`session`]: 세션 시작/정지와 상태 조회 핸들
//! - [`config`]: 포워드 루프 설정

pub mod config;
pub mod forward;
pub mod memory;
pub mod session;
pub mod tun;

pub use config::{ForwardConfig, ForwardConfigBuilder};
pub use forward::{FORWARD_THREAD_NAME, ForwardExit, ForwardLoop, ForwardSnapshot, ForwardStats};
pub use memory::{MemoryInterface, MemoryInterfaceHandle};
pub use session::{CaptureSession, SessionHandle};
#[cfg(unix)]
pub use tun::FdInterface;
pub use tun::{ReadOutcome, TunInterface};
