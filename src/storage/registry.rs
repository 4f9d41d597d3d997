//! Registered vehicles and their owners, stored in SQLite

use chrono::NaiveDateTime;
use regex::Regex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::normalize::fold_latin;

/// One canonical letter, three digits, two letters, a two or three digit region
pub const DEFAULT_PLATE_PATTERN: &str = r"^[АВЕКМНОРСТУХ]\d{3}[АВЕКМНОРСТУХ]{2}\d{2,3}$";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("plate {0} is already registered")]
    Duplicate(String),
    #[error("plate {0} does not match the registration format")]
    InvalidPlate(String),
    #[error("invalid plate pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A registered vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntry {
    /// Plate in canonical Cyrillic form, unique
    pub plate: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: Option<String>,
    pub created_at: NaiveDateTime,
}

impl RegistryEntry {
    /// Owner name as "last first patronymic"
    pub fn owner_display(&self) -> String {
        let mut name = format!("{} {}", self.last_name.trim(), self.first_name.trim());
        if let Some(patronymic) = self.patronymic.as_deref().map(str::trim) {
            if !patronymic.is_empty() {
                name.push(' ');
                name.push_str(patronymic);
            }
        }
        name.trim().to_string()
    }
}

/// Read side of the registry used by verification
pub trait PlateRegistry {
    /// Every entry, in insertion order
    fn list_all(&self) -> Result<Vec<RegistryEntry>, RegistryError>;
}

/// Accepted shape of a registered plate
#[derive(Debug, Clone)]
pub struct PlateFormat {
    pattern: Regex,
}

impl PlateFormat {
    pub fn new(pattern: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn standard() -> Result<Self, RegistryError> {
        Self::new(DEFAULT_PLATE_PATTERN)
    }

    pub fn is_valid(&self, plate: &str) -> bool {
        self.pattern.is_match(plate)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Canonical storage form: trimmed, uppercased, Latin look-alikes as Cyrillic
pub fn canonical_plate(plate: &str) -> String {
    plate
        .trim()
        .chars()
        .flat_map(char::to_uppercase)
        .map(fold_latin)
        .collect()
}

/// SQLite-backed plate registry
pub struct SqliteRegistry {
    conn: Connection,
    format: PlateFormat,
}

impl SqliteRegistry {
    /// Open or create the registry database at `path`
    pub fn open(path: &Path, format: PlateFormat) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Let SQLite report the failure if the directory cannot be created
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        let registry = Self { conn, format };
        registry.ensure_schema()?;
        info!("Opened plate registry at {}", path.display());
        Ok(registry)
    }

    pub fn open_in_memory(format: PlateFormat) -> Result<Self, RegistryError> {
        let registry = Self {
            conn: Connection::open_in_memory()?,
            format,
        };
        registry.ensure_schema()?;
        Ok(registry)
    }

    fn ensure_schema(&self) -> Result<(), RegistryError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS car_owners (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate_number TEXT NOT NULL UNIQUE,
              first_name TEXT NOT NULL,
              last_name TEXT NOT NULL,
              patronymic TEXT,
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;
        Ok(())
    }

    pub fn format(&self) -> &PlateFormat {
        &self.format
    }

    /// Register a plate. Returns the stored canonical plate.
    pub fn add(
        &self,
        plate: &str,
        first_name: &str,
        last_name: &str,
        patronymic: Option<&str>,
    ) -> Result<String, RegistryError> {
        let plate = canonical_plate(plate);
        if !self.format.is_valid(&plate) {
            return Err(RegistryError::InvalidPlate(plate));
        }
        let patronymic = patronymic.map(str::trim).filter(|p| !p.is_empty());

        let inserted = self.conn.execute(
            r#"
            INSERT INTO car_owners(plate_number, first_name, last_name, patronymic)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![plate, first_name.trim(), last_name.trim(), patronymic],
        );
        match inserted {
            Ok(_) => {
                info!("Registered plate {}", plate);
                Ok(plate)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(RegistryError::Duplicate(plate))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a plate. `Ok(false)` when it was not registered.
    pub fn delete(&self, plate: &str) -> Result<bool, RegistryError> {
        let plate = canonical_plate(plate);
        let removed = self
            .conn
            .execute("DELETE FROM car_owners WHERE plate_number = ?1", params![plate])?;
        if removed == 0 {
            debug!("Plate {} not registered, nothing to delete", plate);
        } else {
            info!("Deleted plate {}", plate);
        }
        Ok(removed > 0)
    }

    /// Exact lookup by plate
    pub fn find(&self, plate: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let plate = canonical_plate(plate);
        let entry = self
            .conn
            .query_row(
                r#"
                SELECT plate_number, first_name, last_name, patronymic, created_at
                FROM car_owners WHERE plate_number = ?1
                "#,
                params![plate],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn count(&self) -> Result<usize, RegistryError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM car_owners", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegistryEntry> {
    Ok(RegistryEntry {
        plate: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        patronymic: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl PlateRegistry for SqliteRegistry {
    fn list_all(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT plate_number, first_name, last_name, patronymic, created_at
            FROM car_owners ORDER BY id
            "#,
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
