//! The process-wide symbol session: reference-counted lifecycle, symbol
//! path management and PDB identity extraction from images.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use thiserror::Error;

use crate::download::fetch_pdb;
use crate::image::Image;
use crate::pdbinfo::PdbIdentity;

pub const MICROSOFT_SYMBOL_SERVER: &str = "http://msdl.microsoft.com/download/symbols";
pub const MICROSOFT_SYMBOL_SERVER_SECURE: &str = "https://msdl.microsoft.com/download/symbols";

/// The default search path: a local `symbols` cache backed by the Microsoft
/// symbol server.
pub const DEFAULT_SYM_PATH: &str = "srv*symbols*https://msdl.microsoft.com/download/symbols";

/// Failures surfaced by the symbol side of the crate. Nothing is recovered
/// internally; every failure reaches the caller verbatim.
#[derive(Error, Debug)]
pub enum PdbError {
    /// No [`Prov`] session exists.
    #[error("the symbol provider is not initialized")]
    NotInitialized,
    /// The underlying symbol engine rejected the operation.
    #[error("symbol engine failure: {0}")]
    EngineFailure(String),
    /// No symbol with the requested name.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    /// A symbol was projected to a variant it does not have.
    #[error("bad cast: {0}")]
    BadCast(String),
}

impl From<pdb::Error> for PdbError {
    fn from(e: pdb::Error) -> Self {
        Self::EngineFailure(e.to_string())
    }
}

impl From<std::io::Error> for PdbError {
    fn from(e: std::io::Error) -> Self {
        Self::EngineFailure(e.to_string())
    }
}

struct SessionState {
    ref_count: usize,
    sym_path: String,
    uid: usize,
}

static SESSION: Mutex<SessionState> = Mutex::new(SessionState {
    ref_count: 0,
    sym_path: String::new(),
    uid: 0,
});

fn session() -> std::sync::MutexGuard<'static, SessionState> {
    SESSION.lock().unwrap_or_else(|e| e.into_inner())
}

/// A handle on the process-wide symbol session.
///
/// The first handle initialises the session, the last one to drop tears it
/// down; operations attempted while no handle exists fail with
/// [`PdbError::NotInitialized`]. Initialise before spawning worker threads
/// and serialise queries — the session is a single-threaded resource.
pub struct Prov {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Prov {
    pub fn new() -> Result<Self, PdbError> {
        Self::with_sym_path(DEFAULT_SYM_PATH)
    }

    pub fn with_sym_path(sym_path: &str) -> Result<Self, PdbError> {
        let mut state = session();

        if state.ref_count == 0 {
            state.sym_path = sym_path.to_string();
            state.uid = state.uid.wrapping_add(1).max(1);
            debug!("symbol session initialised (uid {})", state.uid);
        }
        state.ref_count += 1;

        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }

    /// The current session id; fails while no session exists.
    pub fn uid() -> Result<usize, PdbError> {
        let state = session();
        if state.ref_count == 0 {
            return Err(PdbError::NotInitialized);
        }
        Ok(state.uid)
    }

    pub fn get_sym_path(&self) -> Result<String, PdbError> {
        let state = session();
        if state.ref_count == 0 {
            return Err(PdbError::NotInitialized);
        }
        Ok(state.sym_path.clone())
    }

    pub fn set_sym_path(&self, sym_path: &str) -> Result<(), PdbError> {
        let mut state = session();
        if state.ref_count == 0 {
            return Err(PdbError::NotInitialized);
        }
        state.sym_path = sym_path.to_string();
        Ok(())
    }

    /// Read an image in file mode and return the PDB identity its CodeView
    /// record names.
    pub fn get_pdb_info<P: AsRef<Path>>(&self, image_path: P) -> Result<PdbIdentity, PdbError> {
        Self::uid()?;

        let path = image_path.as_ref();
        let data = fs::read(path)?;

        let image = Image::from_file(&data);
        if !image.valid() {
            return Err(PdbError::EngineFailure(format!(
                "{} is not a valid PE image",
                path.display()
            )));
        }

        image.debug().pdb_identity().ok_or_else(|| {
            PdbError::EngineFailure(format!(
                "{} carries no CodeView debug record",
                path.display()
            ))
        })
    }

    /// Fetch the PDB an identity names, using the session's symbol path
    /// (`srv*<cache>*<server>`), and return its location in the cache.
    pub fn download_pdb(&self, identity: &PdbIdentity) -> Result<PathBuf, PdbError> {
        let sym_path = self.get_sym_path()?;

        let mut parts = sym_path.split('*');
        let (cache, server) = match (parts.next(), parts.next(), parts.next()) {
            (Some("srv"), Some(cache), Some(server)) => (cache, server),
            _ => {
                return Err(PdbError::EngineFailure(format!(
                    "symbol path \"{}\" is not of the form srv*<cache>*<server>",
                    sym_path
                )))
            }
        };

        fetch_pdb(server, Path::new(cache), identity).ok_or_else(|| {
            PdbError::EngineFailure(format!("downloading {} failed", identity.symbol_url()))
        })
    }
}

impl Drop for Prov {
    fn drop(&mut self) {
        let mut state = session();
        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count == 0 {
            state.sym_path.clear();
            debug!("symbol session torn down");
        }
    }
}
