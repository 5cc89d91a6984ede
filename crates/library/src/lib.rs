//! A tome library: a catalog of books, the directory their files live in, and
//! the background conversion of those files to EPUB.
//!
//! [`Library::open`] wires everything up from a [`Config`]: the SQLite
//! catalog, the filename template, the metadata parsers and the conversion
//! pipeline.

pub mod error;
pub mod import;

use crate::error::{ErrorKind, Result};
use crate::import::{Import, ImportEvent};
use exn::ResultExt;
use futures::Stream;
use std::path::{Path, PathBuf};
use tome_catalog::{Catalog, Database, PathGenerator};
use tome_config::Config;
use tome_convert::{Conversion, Converter, Pipeline};
use tome_extract::{ParserRegistry, RegexpParser};
use tome_storage::Transfer;
use tracing::instrument;

pub struct Library {
    db: Database,
    catalog: Catalog,
    template: PathGenerator,
    parsers: ParserRegistry,
    pipeline: Pipeline,
}
impl Library {
    /// Opens (creating if needed) the library described by `config`. Must be
    /// called from within a Tokio runtime; the conversion workers are started
    /// on it.
    #[instrument(skip_all, fields(root = %config.root.display()))]
    pub async fn open(config: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.root).await.or_raise(|| ErrorKind::Open)?;
        if let Some(parent) = config.database.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Open)?;
        }
        let db = Database::connect(&config.database, config.durability).await.or_raise(|| ErrorKind::Open)?;
        let catalog = Catalog::new(&db, &config.root);
        let template = config.output_template.parse::<PathGenerator>().or_raise(|| ErrorKind::Open)?;
        let regexp = RegexpParser::new(config.default_regexps().or_raise(|| ErrorKind::Open)?)
            .or_raise(|| ErrorKind::Open)?;
        let parsers = ParserRegistry::from_names(&config.metadata_parsers, regexp).or_raise(|| ErrorKind::Open)?;
        let pipeline = Pipeline::new(&config.cache, Self::converter(config), config.converter.workers)
            .or_raise(|| ErrorKind::Open)?;
        tracing::info!(database = %config.database.display(), ?parsers, "Library opened");
        Ok(Self { db, catalog, template, parsers, pipeline })
    }

    fn converter(config: &Config) -> Converter {
        let settings = &config.converter;
        let program = match &settings.program {
            Some(program) => program.clone(),
            // Conversions report the missing converter when they are requested.
            None => match Converter::discover() {
                Ok(found) => found.program().to_path_buf(),
                Err(_) => PathBuf::from("ebook-convert"),
            },
        };
        Converter::new(program, settings.args.iter().cloned()).with_timeout(settings.timeout())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn template(&self) -> &PathGenerator {
        &self.template
    }

    /// Imports a single file. `hash_override` skips hashing the file and
    /// records the given hash instead. Without one, a hash stored in the
    /// file's `user.hash` attribute is used before the contents are hashed.
    #[instrument(skip(self))]
    pub async fn import_file(
        &self,
        path: impl AsRef<Path> + std::fmt::Debug,
        transfer: Transfer,
        hash_override: Option<String>,
    ) -> Result<Import> {
        import::import_file_inner(self, path.as_ref(), transfer, hash_override)
            .await
            .or_raise(|| ErrorKind::Import)
    }

    /// Imports every path in turn, streaming progress. Directories contribute
    /// the files directly inside them, or every file below them when
    /// `recursive` is set.
    pub fn import(
        &self,
        paths: Vec<PathBuf>,
        transfer: Transfer,
        recursive: bool,
    ) -> impl Stream<Item = Result<ImportEvent>> + '_ {
        import::import(self, paths, transfer, recursive)
    }

    /// The book `path` would be imported into, if one exists already.
    pub async fn find_match(&self, path: impl AsRef<Path>) -> Result<Option<i64>> {
        let Some(parsed) = import::parse(&self.parsers, path.as_ref()).await.or_raise(|| ErrorKind::Import)? else {
            return Ok(None);
        };
        self.catalog
            .get_book_id_by_title_and_authors(&parsed.book.title, &parsed.book.authors)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    /// Requests the EPUB of a catalogued file, see [`Pipeline::convert`].
    pub async fn convert(&self, file_id: i64) -> Result<Conversion> {
        let files = self.catalog.get_files_by_id(&[file_id]).await.or_raise(|| ErrorKind::Catalog)?;
        let Some(file) = files.into_iter().next() else {
            exn::bail!(ErrorKind::NotFound(file_id));
        };
        let source = self.catalog.root().join(&file.filename);
        self.pipeline.convert(&file, source).await.or_raise(|| ErrorKind::Convert)
    }

    /// Stops the conversion workers once they are idle, then closes the
    /// catalog.
    pub async fn close(self) {
        self.pipeline.close();
        self.pipeline.wait().await;
        self.db.close().await;
    }
}
