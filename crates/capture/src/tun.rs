//! 가상 네트워크 인터페이스 경계
//!
//! 포워드 루프는 [`TunInterface`] trait만 알고 있습니다. 실제 장치는
//! [`FdInterface`](Unix descriptor 래퍼)가, 테스트와 드라이런은
//! [`MemoryInterface`](crate::memory::MemoryInterface)가 구현합니다.
//!
//! 인터페이스 핸들은 포워드 루프가 단독으로 소유하며, 다른 구성요소는
//! 인터페이스에 쓰지 않습니다.

use std::io;

#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

#[cfg(unix)]
use packethunter_core::error::CaptureError;

/// 논블로킹 읽기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` 바이트 프레임을 읽음
    Data(usize),
    /// 지금은 읽을 데이터가 없음
    Empty,
    /// 스트림 종료
    Closed,
}

/// 양방향 논블로킹 프레임 스트림
pub trait TunInterface: Send + 'static {
    /// 인터페이스 이름
    fn name(&self) -> &str;

    /// 프레임 하나를 읽습니다. 대기하지 않습니다.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// 프레임 하나를 씁니다. 쓴 바이트 수를 반환합니다.
    fn write(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// 핸들이 아직 열려 있고 사용 가능한지 확인합니다.
    fn is_valid(&self) -> bool;

    /// 읽기/쓰기 양쪽을 닫고 핸들을 해제합니다. 여러 번 호출해도 됩니다.
    fn close(&mut self);
}

/// Unix descriptor 기반 인터페이스
///
/// 생성 시 descriptor 유효성을 확인하고 `O_NONBLOCK`을 설정합니다.
/// `EAGAIN`/`EWOULDBLOCK`은 [`ReadOutcome::Empty`], 0바이트 읽기는
/// [`ReadOutcome::Closed`]로 변환됩니다.
#[cfg(unix)]
pub struct FdInterface {
    name: String,
    fd: Option<OwnedFd>,
}

#[cfg(unix)]
impl FdInterface {
    /// 이미 열린 descriptor를 감쌉니다.
    pub fn new(fd: OwnedFd, name: impl Into<String>) -> Result<Self, CaptureError> {
        let raw = fd.as_raw_fd();
        if !descriptor_is_valid(raw) {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "descriptor {raw} failed validity check"
            )));
        }
        set_nonblocking(raw).map_err(|e| {
            CaptureError::InterfaceUnavailable(format!("cannot set O_NONBLOCK on {raw}: {e}"))
        })?;

        Ok(Self {
            name: name.into(),
            fd: Some(fd),
        })
    }

    /// 원시 descriptor를 검증한 뒤 소유권을 가져옵니다.
    ///
    /// 검증에 실패하면 descriptor를 건드리지 않고 `InterfaceUnavailable`을 반환합니다.
    ///
    /// # Safety
    /// `fd`가 열린 descriptor라면 호출자가 그 소유권을 넘겨야 하며,
    /// 이후 다른 곳에서 닫거나 사용하면 안 됩니다.
    pub unsafe fn from_raw(fd: RawFd, name: impl Into<String>) -> Result<Self, CaptureError> {
        if !descriptor_is_valid(fd) {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "descriptor {fd} is not open"
            )));
        }
        // SAFETY: 열린 descriptor이며 호출자가 소유권을 넘김
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::new(owned, name)
    }

    /// `/dev/net/tun`을 열고 `name` 인터페이스에 연결합니다.
    ///
    /// 주소/라우팅 설정은 외부 네트워크 도구의 몫입니다.
    #[cfg(target_os = "linux")]
    pub fn open_tun(name: &str) -> Result<Self, CaptureError> {
        linux::open_tun(name).and_then(|fd| Self::new(fd, name))
    }
}

#[cfg(unix)]
impl TunInterface for FdInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let Some(fd) = &self.fd else {
            return Ok(ReadOutcome::Closed);
        };
        // SAFETY: buf는 buf.len() 바이트만큼 쓰기 가능한 메모리
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n > 0 {
            return Ok(ReadOutcome::Data(n.unsigned_abs()));
        }
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(ReadOutcome::Empty),
            _ => Err(err),
        }
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let Some(fd) = &self.fd else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "interface closed"));
        };
        // SAFETY: frame은 frame.len() 바이트만큼 읽기 가능한 메모리
        let n = unsafe { libc::write(fd.as_raw_fd(), frame.as_ptr().cast(), frame.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n.unsigned_abs())
    }

    fn is_valid(&self) -> bool {
        self.fd
            .as_ref()
            .is_some_and(|fd| descriptor_is_valid(fd.as_raw_fd()))
    }

    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            tracing::debug!(
                interface = %self.name,
                fd = fd.as_raw_fd(),
                "closing interface descriptor"
            );
            drop(fd);
        }
    }
}

#[cfg(unix)]
fn descriptor_is_valid(fd: RawFd) -> bool {
    // SAFETY: F_GETFD는 descriptor 플래그만 조회
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}

#[cfg(unix)]
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: 플래그 조회/설정만 수행
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: 위와 같음
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    use packethunter_core::error::CaptureError;

    const TUN_DEVICE: &std::ffi::CStr = c"/dev/net/tun";
    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;

    /// `struct ifreq` 중 이름과 플래그만 쓰는 형태
    #[repr(C)]
    #[allow(dead_code)]
    struct IfReq {
        name: [libc::c_char; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    pub(super) fn open_tun(name: &str) -> Result<OwnedFd, CaptureError> {
        if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.bytes().any(|b| b == 0) {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "invalid interface name '{name}'"
            )));
        }

        // SAFETY: NUL 종료 경로 문자열
        let tun_fd = unsafe { libc::open(TUN_DEVICE.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if tun_fd < 0 {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "cannot open /dev/net/tun: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: 방금 연 descriptor
        let fd = unsafe { OwnedFd::from_raw_fd(tun_fd) };

        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: IFF_TUN | IFF_NO_PI,
            _pad: [0; 22],
        };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }

        // SAFETY: req는 커널이 기대하는 ifreq 레이아웃이고 호출 동안 살아 있음
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF as _, std::ptr::addr_of_mut!(req)) };
        if rc < 0 {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "TUNSETIFF on '{name}' failed: {}",
                io::Error::last_os_error()
            )));
        }

        tracing::info!(interface = name, "attached to tun device");
        Ok(fd)
    }
}
