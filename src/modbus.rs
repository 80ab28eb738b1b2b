use crate::prelude::*;

use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::{Reader, Slave};

/// The one operation this crate needs from a Modbus connection.
#[async_trait]
pub trait RegisterTransport: Send {
    async fn read_registers(
        &mut self,
        bank: RegisterBank,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, ReadError>;
}

/// Decodes the first register of a response: big-endian, two's complement,
/// then divided by `scale`.
pub fn decode(bytes: &[u8], scale: f64) -> Result<f64, ReadError> {
    match bytes {
        [hi, lo, ..] => Ok(f64::from(i16::from_be_bytes([*hi, *lo])) / scale),
        _ => Err(ReadError::ShortResponse { len: bytes.len() }),
    }
}

// RegisterReader {{{
pub struct RegisterReader<T> {
    transport: T,
}

impl<T: RegisterTransport> RegisterReader<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Reads exactly one register and returns its physical value.
    pub async fn read_float(&mut self, param: &RegisterParam) -> Result<f64, ReadError> {
        let bytes = self
            .transport
            .read_registers(param.bank, param.address, 1)
            .await?;
        trace!("read {} => {:02x?}", param, bytes);

        decode(&bytes, param.scale)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
} // }}}

// ModbusClient {{{
/// A tokio-modbus context over either a serial line (RTU) or a TCP socket.
/// Only connection setup differs between the two.
pub struct ModbusClient {
    context: Context,
    timeout: Duration,
}

impl ModbusClient {
    pub async fn connect(config: &config::Modbus) -> Result<Self> {
        let slave = Slave(config.slave_id());

        let context = match config.mode() {
            config::ModbusMode::Tcp => {
                let addr = tokio::net::lookup_host(config.tcp_addr())
                    .await
                    .map_err(|err| anyhow!("resolving {}: {}", config.tcp_addr(), err))?
                    .next()
                    .ok_or_else(|| anyhow!("{} did not resolve to an address", config.tcp_addr()))?;

                info!("connecting to modbus tcp at {} (slave {})", addr, config.slave_id());
                tcp::connect_slave(addr, slave)
                    .await
                    .map_err(|err| anyhow!("modbus tcp connect to {} failed: {}", addr, err))?
            }
            config::ModbusMode::Rtu => {
                info!(
                    "opening modbus rtu on {} ({} {}{}{}, slave {})",
                    config.port(),
                    config.baud(),
                    config.data_bits(),
                    config.parity(),
                    config.stop_bits(),
                    config.slave_id()
                );

                let builder = tokio_serial::new(config.port(), config.baud())
                    .data_bits(data_bits(config.data_bits())?)
                    .parity(parity(config.parity())?)
                    .stop_bits(stop_bits(config.stop_bits())?)
                    .timeout(config.timeout());
                let port = tokio_serial::SerialStream::open(&builder)
                    .map_err(|err| anyhow!("opening {} failed: {}", config.port(), err))?;

                rtu::attach_slave(port, slave)
            }
        };

        Ok(Self {
            context,
            timeout: config.timeout(),
        })
    }

    /// Consumes the client, closing the underlying serial port or socket.
    pub fn close(self) {
        info!("closing modbus connection");
        drop(self.context);
    }
}

#[async_trait]
impl RegisterTransport for ModbusClient {
    async fn read_registers(
        &mut self,
        bank: RegisterBank,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, ReadError> {
        let timeout = self.timeout;
        let context = &mut self.context;

        let request = async move {
            match bank {
                RegisterBank::Input => context.read_input_registers(address, count).await,
                RegisterBank::Holding => context.read_holding_registers(address, count).await,
            }
        };

        let words = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ReadError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        Ok(words.iter().flat_map(|word| word.to_be_bytes()).collect())
    }
} // }}}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    use tokio_serial::DataBits::*;

    Ok(match bits {
        5 => Five,
        6 => Six,
        7 => Seven,
        8 => Eight,
        _ => bail!("unsupported data bits {}", bits),
    })
}

fn parity(parity: &str) -> Result<tokio_serial::Parity> {
    Ok(match parity.to_ascii_uppercase().as_str() {
        "N" => tokio_serial::Parity::None,
        "E" => tokio_serial::Parity::Even,
        "O" => tokio_serial::Parity::Odd,
        _ => bail!("unsupported parity {:?}, use N, E or O", parity),
    })
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    use tokio_serial::StopBits::*;

    Ok(match bits {
        1 => One,
        2 => Two,
        _ => bail!("unsupported stop bits {}", bits),
    })
}
