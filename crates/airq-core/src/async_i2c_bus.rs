//! Sharing one async I2C bus between the climate and air-quality drivers.
//!
//! Each driver owns its own [`AsyncI2cDevice`]; the device locks the bus for
//! the duration of one operation and releases it afterwards, so the two
//! sensors' transactions interleave but never overlap.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

/// A bus shared by several [`AsyncI2cDevice`]s.
pub type SharedI2cBus<T, M = CriticalSectionRawMutex> = Mutex<M, T>;

/// One device's handle on a [`SharedI2cBus`].
///
/// ```no_run
/// use airq_core::async_i2c_bus::{AsyncI2cDevice, SharedI2cBus};
/// use embassy_sync::mutex::Mutex;
/// # async fn demo<B: embedded_hal_async::i2c::I2c>(bus: B) {
/// let bus: SharedI2cBus<B> = Mutex::new(bus);
/// let climate_i2c = AsyncI2cDevice::new(&bus);
/// let air_quality_i2c = AsyncI2cDevice::new(&bus);
/// # }
/// ```
pub struct AsyncI2cDevice<'a, T, M: RawMutex = CriticalSectionRawMutex> {
    bus: &'a Mutex<M, T>,
}

impl<'a, T, M: RawMutex> AsyncI2cDevice<'a, T, M> {
    #[inline]
    pub const fn new(bus: &'a Mutex<M, T>) -> Self {
        Self { bus }
    }
}

impl<T, M> ErrorType for AsyncI2cDevice<'_, T, M>
where
    T: ErrorType,
    M: RawMutex,
{
    type Error = T::Error;
}

impl<T, M> I2c for AsyncI2cDevice<'_, T, M>
where
    T: I2c,
    M: RawMutex,
{
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.read(address, read).await
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.write(address, write).await
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.write_read(address, write, read).await
    }

    /// The bus stays locked across all operations of the transaction.
    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.transaction(address, operations).await
    }
}
