//! Placeholder backend (format code `"50"`) for digests whose bytes have not
//! been fetched yet. Reads against it raise `NotFound` until a matching
//! fetch-data pass materializes the real container and flips the hash
//! record over to the chunked backend.

use std::collections::HashSet;

use crate::backend::Backend;
use crate::backend::FormatCode;
use crate::backend::WriteTarget;
use crate::error::Error;
use crate::error::Result;
use crate::location::BackendLocation;
use crate::schema::Schema;
use crate::schema::Tensor;

#[derive(Debug, Default)]
pub struct ReferenceOnlyBackend;

impl Backend for ReferenceOnlyBackend {
    fn format_code(&self) -> FormatCode {
        FormatCode::ReferenceOnly
    }

    fn create_schema(&mut self, _schema: &Schema) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _schema: &Schema, _tensor: &Tensor, _target: WriteTarget) -> Result<BackendLocation> {
        Err(Error::state("the reference-only backend holds no bytes and cannot accept writes"))
    }

    fn read(&mut self, location: &BackendLocation) -> Result<Tensor> {
        Err(Error::not_found(format!(
            "sample bytes at {location:?} have not been fetched from a remote yet"
        )))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn sweep_unused(&self, _referenced_uids: &HashSet<String>) -> Result<()> {
        Ok(())
    }
}
