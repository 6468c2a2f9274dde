//! Card sessions: the lifecycle of a connection to one card and the operations on it.

#[cfg(feature = "tracing")]
use tracing::{debug, error, info};

use crate::backend::{self, Backend, CardIo, HashAlgorithm, Keypair, PinCallback};
use crate::error::{describe, Error, Result};
use crate::keygrip::CertificateParser;
use crate::serial;
use crate::transport::{Connection, Context, Driver};

const DEFAULT_APP_NAME: &str = "scdaemon";

/// Options of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Index of the reader to use.
    pub reader: usize,

    /// Logs the connected driver and the result of each card operation.
    pub verbose: bool,

    /// Asks the driver stack to trace its traffic.
    pub debug_transport: bool,

    /// Name of the application the transport context is established for.
    pub app_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reader: 0,
            verbose: false,
            debug_transport: false,
            app_name: DEFAULT_APP_NAME.to_owned(),
        }
    }
}

/// A session with the card in one reader.
///
/// The card is locked for exclusive access from a successful [`Session::open`] until the
/// session is closed or dropped. Releasing happens in reverse order of acquisition:
/// the bound application, then the connection, then the transport context.
///
/// A session is not meant to be shared between threads; a blocking PIN callback blocks the
/// thread running the operation.
pub struct Session<C>
where
    C: Context,
{
    options: Options,
    ctx: Option<C>,
    conn: Option<C::Connection>,
    locked: bool,
    initialized: bool,
    backend: Option<Box<dyn Backend>>,
    certs: Box<dyn CertificateParser>,
    serial: Option<String>,
}

impl<C> Session<C>
where
    C: Context,
{
    /// Establishes a transport context, then connects to the card in the configured reader
    /// and locks it.
    ///
    /// Nothing acquired on the way is left behind when this fails.
    pub fn open<D>(driver: &D, certs: Box<dyn CertificateParser>, options: Options) -> Result<Self>
    where
        D: Driver<Context = C>,
    {
        let ctx = driver
            .establish_context(&options.app_name, options.debug_transport)
            .map_err(|e| {
                error!("failed to establish SC context: {}", e);
                Error::from(e)
            })?;

        let mut session = Self {
            options,
            ctx: Some(ctx),
            conn: None,
            locked: false,
            initialized: false,
            backend: None,
            certs,
            serial: None,
        };

        // Dropping the session on failure releases whatever was acquired.
        session.connect()?;

        Ok(session)
    }

    fn connect(&mut self) -> Result<()> {
        let reader = self.options.reader;
        let ctx = self.ctx.as_mut().ok_or(Error::CardError)?;

        if reader >= ctx.reader_count() {
            error!("no card reader available");
            return Err(Error::CardError);
        }

        if !matches!(ctx.detect_card_presence(reader), Ok(true)) {
            return Err(Error::CardNotPresent);
        }

        let conn = ctx.connect(reader).map_err(|e| {
            error!("failed to connect card in reader {}: {}", reader, e);
            Error::from(e)
        })?;

        if self.options.verbose {
            info!(
                "connected to card in reader {} using driver `{}'",
                reader,
                conn.driver_name()
            );
        }

        let conn = self.conn.insert(conn);
        conn.lock().map_err(|e| {
            error!("can't lock card in reader {}: {}", reader, e);
            Error::from(e)
        })?;
        self.locked = true;

        Ok(())
    }

    /// Closes the session, releasing the card.
    pub fn close(self) {
        drop(self)
    }

    fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
        }

        if let Some(mut conn) = self.conn.take() {
            if self.locked {
                conn.unlock();
                self.locked = false;
            }

            conn.disconnect();
        }

        if let Some(mut ctx) = self.ctx.take() {
            ctx.release();
        }
    }

    pub fn reader(&self) -> usize {
        self.options.reader
    }

    /// Whether a backend has been bound to the session.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Name of the bound backend.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Binds the backend matching the card, unless one has been bound already.
    ///
    /// This runs at most once per session, whatever its outcome.
    pub fn bind(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let reader = self.options.reader;
        let conn = self.conn.as_mut().ok_or(Error::CardError)?;
        let backend = backend::bind(conn, reader);

        debug!("using the {} backend in reader {}", backend.name(), reader);

        self.backend = Some(backend);
        self.initialized = true;

        Ok(())
    }

    /// Retrieves the serial number of the card and the time of its last update.
    ///
    /// The first call binds the backend. The time of update is not available and is always 0.
    pub fn serial_and_stamp(&mut self) -> Result<(String, u64)> {
        self.bind()?;

        if let Some(serial) = &self.serial {
            return Ok((serial.clone(), 0));
        }

        let application_serial = self
            .backend
            .as_ref()
            .and_then(|b| b.application())
            .map(|app| app.serial_number().unwrap_or_default().to_owned());

        let conn = self.conn.as_mut().ok_or(Error::CardError)?;
        let serial = serial::resolve(conn, application_serial.as_deref())?;

        self.serial = Some(serial.clone());

        Ok((serial, 0))
    }

    /// Enumerates the keypairs on the card.
    ///
    /// Returns `None` once all keypairs have been enumerated. [`Error::MissingCertificate`]
    /// is returned for a private key without certificate; callers may continue enumerating
    /// with the next index.
    pub fn enum_keypairs(&mut self, idx: i32) -> Result<Option<Keypair>> {
        let result = usize::try_from(idx)
            .map_err(|_| Error::InvalidIndex)
            .and_then(|idx| {
                let (backend, io) = self.parts()?;
                let slot = backend.keypairs().ok_or(Error::UnsupportedOperation)?;
                slot.enum_keypairs(io, idx)
            });

        self.report("enum_keypairs", &result);
        result
    }

    /// Reads the DER-encoded certificate with the ID.
    /// The ID is passed to the backend as it is.
    pub fn read_cert(&mut self, cert_id: &str) -> Result<Vec<u8>> {
        let result = self.parts().and_then(|(backend, io)| {
            let slot = backend.certificates().ok_or(Error::UnsupportedOperation)?;
            slot.read_cert(io, cert_id)
        });

        self.report("read_cert", &result);
        result
    }

    /// Signs the digest with the key, asking for the PIN through the callback when required.
    pub fn sign(
        &mut self,
        key_id: &str,
        hash: HashAlgorithm,
        pin: Option<&mut dyn PinCallback>,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        let result = match pin {
            Some(pin) if !digest.is_empty() => self.parts().and_then(|(backend, io)| {
                let slot = backend.signer().ok_or(Error::UnsupportedOperation)?;
                slot.sign(io, key_id, hash, pin, digest)
            }),
            _ => Err(Error::InvalidValue),
        };

        self.report("sign", &result);
        result
    }

    /// Deciphers the data with the key, asking for the PIN through the callback when required.
    pub fn decipher(
        &mut self,
        key_id: &str,
        pin: Option<&mut dyn PinCallback>,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let result = match pin {
            Some(pin) if !data.is_empty() => self.parts().and_then(|(backend, io)| {
                let slot = backend.decipherer().ok_or(Error::UnsupportedOperation)?;
                slot.decipher(io, key_id, pin, data)
            }),
            _ => Err(Error::InvalidValue),
        };

        self.report("decipher", &result);
        result
    }

    fn parts(&mut self) -> Result<(&mut Box<dyn Backend>, CardIo<'_>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let backend = self.backend.as_mut().ok_or(Error::NotInitialized)?;
        let conn: &mut dyn Connection = self.conn.as_mut().ok_or(Error::CardError)?;

        Ok((
            backend,
            CardIo {
                conn,
                certs: self.certs.as_ref(),
            },
        ))
    }

    fn report<T>(&self, op: &str, result: &Result<T>) {
        if self.options.verbose {
            info!("card operation {} result: {}", op, describe(result));
        } else if result.is_err() {
            debug!("card operation {} result: {}", op, describe(result));
        }
    }
}

impl<C> Drop for Session<C>
where
    C: Context,
{
    fn drop(&mut self) {
        self.release();
    }
}
