//! Unix TTY 串口后端
//!
//! 通过 termios 将设备配置为原始模式（8N1，无流控），读超时使用
//! `VMIN = 0` / `VTIME` 实现，`read` 超时返回 0 字节。

use crate::line::LineReader;
use crate::{RxPort, SerialError, SerialPort, SplittablePort, TxPort};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// 默认读超时（VTIME 以 100ms 为单位）
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 串口设备
///
/// # 示例
///
/// ```no_run
/// use sorter_serial::{SerialPort, TtyPort};
///
/// let mut port = TtyPort::open("/dev/ttyACM0", 115200).unwrap();
/// port.write_line("1|D,30,0\n").unwrap();
/// ```
#[derive(Debug)]
pub struct TtyPort {
    path: PathBuf,
    baud: u32,
    reader: LineReader<File>,
    writer: File,
    read_timeout: Duration,
}

fn baud_rate(baud: u32) -> Result<BaudRate, SerialError> {
    Ok(match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        other => return Err(SerialError::UnsupportedBaud(other)),
    })
}

/// 将超时换算为 VTIME（0.1s 为单位，1..=255）
fn vtime(timeout: Duration) -> u8 {
    let deciseconds = timeout.as_millis().div_ceil(100);
    deciseconds.clamp(1, 255) as u8
}

fn configure(file: &File, baud: u32, read_timeout: Duration) -> Result<(), SerialError> {
    let rate = baud_rate(baud)?;
    let mut tio = termios::tcgetattr(file).map_err(std::io::Error::from)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, rate).map_err(std::io::Error::from)?;
    tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = vtime(read_timeout);
    termios::tcsetattr(file, SetArg::TCSANOW, &tio).map_err(std::io::Error::from)?;
    termios::tcflush(file, FlushArg::TCIOFLUSH).map_err(std::io::Error::from)?;
    Ok(())
}

impl TtyPort {
    /// 打开并配置串口
    ///
    /// # 参数
    /// - `path`: 设备路径（如 `/dev/ttyACM0`）
    /// - `baud`: 波特率（常用 115200）
    ///
    /// # 错误
    /// - `SerialError::Device`: 设备无法打开
    /// - `SerialError::UnsupportedBaud`: 不支持的波特率
    /// - `SerialError::Io`: termios 配置失败
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self, SerialError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY)
            .open(&path)
            .map_err(|e| {
                SerialError::Device(format!(
                    "Failed to open serial port '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        configure(&file, baud, DEFAULT_READ_TIMEOUT)?;
        let writer = file.try_clone()?;

        debug!("Serial port '{}' opened at {} baud", path.display(), baud);

        Ok(Self {
            path,
            baud,
            reader: LineReader::new(file),
            writer,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl SerialPort for TtyPort {
    fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        write_all_flush(&mut self.writer, line)
    }

    fn read_line(&mut self) -> Result<String, SerialError> {
        self.reader.read_line()
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        if let Err(e) = configure(self.reader.get_ref(), self.baud, timeout) {
            tracing::warn!("Failed to update serial read timeout: {}", e);
            return;
        }
        self.read_timeout = timeout;
    }
}

fn write_all_flush(file: &mut File, line: &str) -> Result<(), SerialError> {
    trace!("serial tx: {}", line.trim_end());
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// TTY 只读端
#[derive(Debug)]
pub struct TtyRxPort {
    reader: LineReader<File>,
}

/// TTY 只写端
#[derive(Debug)]
pub struct TtyTxPort {
    writer: File,
}

impl RxPort for TtyRxPort {
    fn read_line(&mut self) -> Result<String, SerialError> {
        self.reader.read_line()
    }
}

impl TxPort for TtyTxPort {
    fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        write_all_flush(&mut self.writer, line)
    }
}

impl SplittablePort for TtyPort {
    type RxPort = TtyRxPort;
    type TxPort = TtyTxPort;

    /// 分离为独立的读写端
    ///
    /// 两端共享同一个打开文件描述（`dup`），termios 设置对两端同时生效。
    fn split(self) -> Result<(Self::RxPort, Self::TxPort), SerialError> {
        trace!("Serial port '{}' split into RX and TX", self.path.display());
        Ok((
            TtyRxPort {
                reader: self.reader,
            },
            TtyTxPort {
                writer: self.writer,
            },
        ))
    }
}
