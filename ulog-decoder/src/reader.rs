//! ULog file reader
//!
//! `UlogReader` validates the file prologue, runs the two-pass statistics and
//! index scan, and then serves as the steady-state seek/read interface.
//!
//! Two passes are required because ULog resolves multi-instance counts only
//! by observation: the field catalog needs one entry per instance per field,
//! but how many instances of a schema exist is only known after every data
//! frame has been seen. Pass 1 gathers statistics, the seek index and the
//! per-schema maximum instance id; pass 2 re-scans the declaration section
//! and synthesizes the fully-qualified field catalog.

use crate::cursor::LogCursor;
use crate::frame::{
    self, DataRecord, KeyValue, LogMessage, HDRLEN, MESSAGE_TYPE_DATA, MESSAGE_TYPE_FORMAT,
    MESSAGE_TYPE_INFO, MESSAGE_TYPE_PARAMETER,
};
use crate::schema::SchemaRegistry;
use crate::types::{DecodeError, DecodeErrorKind, FieldValue, Result, UlogError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

/// Expected file magic: `ULog` + version bytes
const FILE_MAGIC: [u8; 7] = [b'U', b'L', b'o', b'g', 0x01, 0x12, 0x35];

/// Prologue length: magic + version + flags byte + u64 start timestamp
const FILE_HEADER_LEN: u64 = 16;

/// One seek index entry, appended per data frame in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    /// Record timestamp in microseconds
    pub timestamp: u64,
    /// Byte offset of the frame start
    pub offset: u64,
}

/// A recorded in-flight change of a parameter value
#[derive(Debug, Clone, PartialEq)]
pub struct ParamUpdate {
    pub key: String,
    /// The new value the parameter was changed to
    pub value: FieldValue,
    /// Most recent data timestamp observed before the redeclaration;
    /// `None` if the parameter changed before any data frame
    pub timestamp: Option<u64>,
}

/// One decoded data record, flattened into fully-qualified name/value pairs
#[derive(Debug, Clone)]
pub struct DataUpdate {
    /// Record timestamp in microseconds
    pub timestamp: u64,
    /// Values keyed as `<schemaName>_<instanceId>.<fieldName>`, with an
    /// `[index]` suffix for array elements
    pub fields: HashMap<String, FieldValue>,
}

/// Reader for ULog telemetry log files
///
/// All statistics, registries and the seek index are populated once during
/// `open()` and are read-only afterwards; the only later mutation is the
/// cursor position via `seek()`/`read_next()`. The reader is single-threaded
/// by design: one reader per file handle.
pub struct UlogReader<R> {
    cursor: LogCursor<R>,
    registry: SchemaRegistry,
    errors: Vec<DecodeError>,

    log_start_timestamp: u64,
    system_name: String,
    data_start: u64,
    record_count: u64,
    start_us: Option<u64>,
    duration_us: u64,
    utc_time_reference: Option<u64>,

    fields: HashMap<String, String>,
    max_instance_id: HashMap<u16, u8>,
    version: HashMap<String, FieldValue>,
    info: HashMap<String, FieldValue>,
    parameters: HashMap<String, FieldValue>,
    parameter_updates: HashMap<String, Vec<ParamUpdate>>,
    seek_index: Vec<SeekEntry>,
}

impl UlogReader<BufReader<File>> {
    /// Open and fully index a ULog file
    ///
    /// Either returns a ready-to-read reader or fails fatally; recoverable
    /// decode anomalies encountered while indexing are available via
    /// [`errors`](Self::errors).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Opening ULog file: {:?}", path);
        let file = File::open(path)?;
        let reader = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "Indexed {:?}: {} messages, {} schemas, {} decode errors",
            path,
            reader.record_count,
            reader.registry.len(),
            reader.errors.len()
        );
        Ok(reader)
    }
}

impl<R: Read + Seek> UlogReader<R> {
    /// Open and fully index a ULog stream from any `Read + Seek` source
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut this = Self {
            cursor: LogCursor::new(reader)?,
            registry: SchemaRegistry::new(),
            errors: Vec::new(),
            log_start_timestamp: 0,
            system_name: "PX4".to_string(),
            data_start: 0,
            record_count: 0,
            start_us: None,
            duration_us: 0,
            utc_time_reference: None,
            fields: HashMap::new(),
            max_instance_id: HashMap::new(),
            version: HashMap::new(),
            info: HashMap::new(),
            parameters: HashMap::new(),
            parameter_updates: HashMap::new(),
            seek_index: Vec::new(),
        };
        this.update_statistics()?;
        Ok(this)
    }

    /// Validate the fixed prologue and extract the recording start time.
    /// A flags-byte mismatch alone is tolerated with a warning.
    fn read_file_header(&mut self) -> Result<()> {
        let mut header = [0u8; FILE_HEADER_LEN as usize];
        self.cursor.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                UlogError::WrongFileFormat
            } else {
                UlogError::Io(e)
            }
        })?;

        if header[..FILE_MAGIC.len()] != FILE_MAGIC {
            return Err(UlogError::WrongFileFormat);
        }
        if header[7] != 0x00 {
            log::warn!("ULog: different version than expected, will try anyway");
        }

        self.log_start_timestamp = u64::from_le_bytes(
            header[8..16].try_into().unwrap_or([0u8; 8]),
        );
        Ok(())
    }

    /// Decode the next frame, skipping recoverable anomalies.
    ///
    /// Returns the frame start offset together with the message so the scan
    /// passes can build the seek index. `record_errors` is cleared during
    /// pass 2 so anomalies in the declaration section are not double-counted.
    fn next_message(&mut self, record_errors: bool) -> Result<Option<(u64, LogMessage)>> {
        loop {
            let mut header = [0u8; HDRLEN as usize];
            match self.cursor.read_exact_or_eof(&mut header) {
                Ok(true) => {}
                // Clean end-of-stream at a frame boundary; a partial header
                // is treated the same way (nothing left to resynchronize to)
                Ok(false) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let pos = self.cursor.position() - HDRLEN;
            let kind = header[0];
            let declared_len = u16::from_le_bytes([header[1], header[2]]) as usize;

            let mut payload = vec![0u8; declared_len];
            if let Err(e) = self.cursor.read_exact(&mut payload) {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    // A header was already read, so this is a truncation,
                    // not a clean end-of-stream
                    if record_errors {
                        self.record_error(pos, DecodeErrorKind::UnexpectedEof,
                            "Unexpected end of file".to_string());
                    }
                    return Ok(None);
                }
                return Err(e.into());
            }

            // Cursor is already at the declared frame boundary; parsers work
            // on the buffered payload, so a misbehaving payload can only
            // produce an error record, never drift.
            let (message, consumed) = match kind {
                MESSAGE_TYPE_FORMAT => {
                    let schema = frame::parse_format(&payload)?;
                    let schema = self.registry.register(schema);
                    (LogMessage::Format(schema), declared_len)
                }
                MESSAGE_TYPE_DATA => {
                    let msg_id = match payload.first() {
                        Some(&id) => id as u16,
                        None => {
                            if record_errors {
                                self.record_error(pos, DecodeErrorKind::MessageSizeMismatch,
                                    "Empty DATA payload".to_string());
                            }
                            continue;
                        }
                    };
                    let Some(schema) = self.registry.get(msg_id) else {
                        if record_errors {
                            self.record_error(pos, DecodeErrorKind::UnknownDataId,
                                format!("Unknown DATA message ID: {}", msg_id));
                        }
                        continue;
                    };
                    match frame::parse_data(&payload, schema) {
                        Ok((record, consumed)) => (LogMessage::Data(record), consumed),
                        Err(_) => {
                            // Schema layout reaches past the declared length
                            if record_errors {
                                self.record_error(pos, DecodeErrorKind::MessageSizeMismatch,
                                    format!("Message size mismatch, msg size: {}", declared_len));
                            }
                            continue;
                        }
                    }
                }
                MESSAGE_TYPE_INFO => {
                    let (entry, consumed) = frame::parse_key_value(&payload)?;
                    (LogMessage::Info(entry), consumed)
                }
                MESSAGE_TYPE_PARAMETER => {
                    let (entry, consumed) = frame::parse_key_value(&payload)?;
                    (LogMessage::Parameter(entry), consumed)
                }
                other => {
                    if record_errors {
                        self.record_error(pos, DecodeErrorKind::UnknownMessageType,
                            format!("Unknown message type: {}", other));
                    }
                    continue;
                }
            };

            if consumed != declared_len && record_errors {
                self.record_error(pos, DecodeErrorKind::MessageSizeMismatch,
                    format!("Message size mismatch, parsed: {}, msg size: {}",
                        consumed, declared_len));
            }

            return Ok(Some((pos, message)));
        }
    }

    fn record_error(&mut self, offset: u64, kind: DecodeErrorKind, message: String) {
        log::debug!("Decode error at offset {}: {}", offset, message);
        self.errors.push(DecodeError {
            offset,
            kind,
            message,
        });
    }

    /// Two-pass open-time scan: statistics + seek index, then field catalog
    fn update_statistics(&mut self) -> Result<()> {
        self.cursor.seek_to(0)?;
        self.read_file_header()?;

        let mut packets: u64 = 0;
        let mut time_start: Option<u64> = None;
        let mut time_end: Option<u64> = None;
        let mut last_time: Option<u64> = None;

        // Pass 1: statistics, seek index, max instance ids, parameters
        while let Some((pos, msg)) = self.next_message(true)? {
            packets += 1;
            match msg {
                // Registration already happened inside next_message
                LogMessage::Format(_) => {}
                LogMessage::Info(entry) => self.apply_info(entry),
                LogMessage::Parameter(entry) => self.apply_parameter(entry, last_time),
                LogMessage::Data(record) => {
                    if self.data_start == 0 {
                        self.data_start = pos;
                    }
                    self.seek_index.push(SeekEntry {
                        timestamp: record.timestamp,
                        offset: pos,
                    });
                    if time_start.is_none() {
                        time_start = Some(record.timestamp);
                    }
                    time_end = Some(time_end.map_or(record.timestamp, |t| t.max(record.timestamp)));
                    last_time = Some(record.timestamp);

                    let max = self
                        .max_instance_id
                        .entry(record.schema.id)
                        .or_insert(record.instance_id);
                    if *max < record.instance_id {
                        *max = record.instance_id;
                    }
                }
            }
        }

        // Pass 2: now that instance counts are known, build the field
        // catalog from the declaration section. Stops at the first data
        // frame; schemas declared only after that point are omitted.
        self.cursor.seek_to(FILE_HEADER_LEN)?;
        while let Some((_, msg)) = self.next_message(false)? {
            match msg {
                LogMessage::Format(schema) => self.catalog_schema(&schema),
                LogMessage::Data(_) => break,
                _ => {}
            }
        }

        self.record_count = packets;
        self.start_us = time_start;
        self.duration_us = match (time_start, time_end) {
            (Some(start), Some(end)) => end - start,
            _ => 0,
        };

        self.seek(0)?;
        Ok(())
    }

    fn apply_info(&mut self, entry: KeyValue) {
        match entry.key.as_str() {
            "sys_name" => {
                if let FieldValue::String(name) = &entry.value {
                    self.system_name = name.clone();
                }
            }
            "ver_hw" => {
                self.version.insert("HW".to_string(), entry.value.clone());
            }
            "ver_sw" => {
                self.version.insert("FW".to_string(), entry.value.clone());
            }
            "time_ref_utc" => {
                if let Some(seconds) = entry.value.as_i64() {
                    self.utc_time_reference = Some(seconds.max(0) as u64 * 1_000_000);
                }
            }
            _ => {}
        }
        self.info.insert(entry.key, entry.value);
    }

    /// First declaration sets the current value; a redeclaration appends the
    /// new value to the per-key update history (timestamped with the most
    /// recent data timestamp, if any) and replaces the current value.
    fn apply_parameter(&mut self, entry: KeyValue, last_time: Option<u64>) {
        if self.parameters.contains_key(&entry.key) {
            log::debug!(
                "Parameter update: {} = {} at t = {:?}",
                entry.key,
                entry.value,
                last_time
            );
            self.parameter_updates
                .entry(entry.key.clone())
                .or_default()
                .push(ParamUpdate {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                    timestamp: last_time,
                });
        }
        self.parameters.insert(entry.key, entry.value);
    }

    /// Expand one schema into fully-qualified catalog entries, one per
    /// (instance id x field x array index), excluding internal schemas,
    /// padding fields and the implicit timestamp field. A schema that never
    /// appeared in a data frame has no instance ceiling and is skipped.
    fn catalog_schema(&mut self, schema: &crate::schema::MessageSchema) {
        if schema.is_internal() {
            return;
        }
        let Some(&max_instance) = self.max_instance_id.get(&schema.id) else {
            return;
        };

        for field in &schema.fields {
            if field.is_padding() || field.name == "timestamp" {
                continue;
            }
            for mid in 0..=max_instance {
                if field.is_array() {
                    for j in 0..field.arity {
                        self.fields.insert(
                            format!("{}_{}.{}[{}]", schema.name, mid, field.name, j),
                            field.field_type.name().to_string(),
                        );
                    }
                } else {
                    self.fields.insert(
                        format!("{}_{}.{}", schema.name, mid, field.name),
                        field.field_type.name().to_string(),
                    );
                }
            }
        }
    }

    /// Reposition to the first data record with timestamp >= `target_us`.
    ///
    /// `0` is the sentinel for "beginning of the data section". Returns
    /// whether a matching record exists; on `false` the cursor stays at the
    /// data-section start.
    pub fn seek(&mut self, target_us: u64) -> Result<bool> {
        let data_start = if self.data_start == 0 {
            FILE_HEADER_LEN
        } else {
            self.data_start
        };
        self.cursor.seek_to(data_start)?;
        if target_us == 0 {
            return Ok(true);
        }

        // The index is appended in file order and timestamps are expected
        // non-decreasing, so binary search applies
        let idx = self
            .seek_index
            .partition_point(|entry| entry.timestamp < target_us);
        match self.seek_index.get(idx) {
            Some(entry) => {
                self.cursor.seek_to(entry.offset)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode the next message of any kind, or `None` at end-of-stream
    pub fn read_message(&mut self) -> Result<Option<LogMessage>> {
        Ok(self.next_message(true)?.map(|(_, msg)| msg))
    }

    /// Pull the next data record, flattened into name/value pairs.
    /// Non-data messages are decoded and discarded along the way.
    pub fn read_next(&mut self) -> Result<Option<DataUpdate>> {
        loop {
            match self.next_message(true)? {
                None => return Ok(None),
                Some((_, LogMessage::Data(record))) => {
                    return Ok(Some(Self::flatten(record)));
                }
                Some(_) => continue,
            }
        }
    }

    fn flatten(record: DataRecord) -> DataUpdate {
        let DataRecord {
            schema,
            instance_id,
            timestamp,
            values,
        } = record;

        let prefix = format!("{}_{}", schema.name, instance_id);
        let mut fields = HashMap::new();
        for (descriptor, value) in schema.fields.iter().zip(values) {
            match value {
                FieldValue::Array(elements) => {
                    for (j, element) in elements.into_iter().enumerate() {
                        fields.insert(format!("{}.{}[{}]", prefix, descriptor.name, j), element);
                    }
                }
                scalar => {
                    fields.insert(format!("{}.{}", prefix, descriptor.name), scalar);
                }
            }
        }

        DataUpdate { timestamp, fields }
    }

    /// Fully-qualified field catalog: name -> declared type token
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// Current value per parameter key
    pub fn parameters(&self) -> &HashMap<String, FieldValue> {
        &self.parameters
    }

    /// Change history for parameters redeclared mid-log
    pub fn parameter_updates(&self) -> &HashMap<String, Vec<ParamUpdate>> {
        &self.parameter_updates
    }

    /// Latest value per info key, including keys with no dedicated accessor
    pub fn info(&self) -> &HashMap<String, FieldValue> {
        &self.info
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Hardware/firmware version strings keyed `HW`/`FW`
    pub fn version(&self) -> &HashMap<String, FieldValue> {
        &self.version
    }

    pub fn utc_time_reference_us(&self) -> Option<u64> {
        self.utc_time_reference
    }

    /// Total number of decoded messages of all kinds
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Timestamp of the first data record, if any
    pub fn start_us(&self) -> Option<u64> {
        self.start_us
    }

    /// Last minus first data timestamp
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    /// Recording start timestamp from the file prologue
    pub fn log_start_timestamp(&self) -> u64 {
        self.log_start_timestamp
    }

    /// Recoverable decode anomalies accumulated so far
    pub fn errors(&self) -> &[DecodeError] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prologue(start_timestamp: u64) -> Vec<u8> {
        let mut bytes = vec![b'U', b'L', b'o', b'g', 0x01, 0x12, 0x35, 0x00];
        bytes.extend_from_slice(&start_timestamp.to_le_bytes());
        bytes
    }

    #[test]
    fn test_open_empty_log() {
        let reader = UlogReader::from_reader(Cursor::new(prologue(42))).unwrap();
        assert_eq!(reader.log_start_timestamp(), 42);
        assert_eq!(reader.record_count(), 0);
        assert_eq!(reader.start_us(), None);
        assert_eq!(reader.duration_us(), 0);
        assert_eq!(reader.system_name(), "PX4");
        assert!(reader.fields().is_empty());
        assert!(reader.errors().is_empty());
    }

    #[test]
    fn test_wrong_magic_is_fatal() {
        let mut bytes = prologue(0);
        bytes[0] = b'X';
        let result = UlogReader::from_reader(Cursor::new(bytes));
        assert!(matches!(result, Err(UlogError::WrongFileFormat)));
    }

    #[test]
    fn test_wrong_version_byte_is_fatal() {
        let mut bytes = prologue(0);
        bytes[5] = 0x99;
        let result = UlogReader::from_reader(Cursor::new(bytes));
        assert!(matches!(result, Err(UlogError::WrongFileFormat)));
    }

    #[test]
    fn test_flags_byte_mismatch_is_tolerated() {
        let mut bytes = prologue(7);
        bytes[7] = 0x01;
        let reader = UlogReader::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.log_start_timestamp(), 7);
    }

    #[test]
    fn test_truncated_prologue_is_fatal() {
        let result = UlogReader::from_reader(Cursor::new(vec![b'U', b'L', b'o']));
        assert!(matches!(result, Err(UlogError::WrongFileFormat)));
    }

    #[test]
    fn test_open_from_path() {
        let mut bytes = prologue(5);
        let mut declaration = vec![b'F', 0, 0];
        let body = b"\x01\x00S:uint64 timestamp";
        declaration[1] = body.len() as u8;
        declaration.extend_from_slice(body);
        bytes.extend_from_slice(&declaration);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flight.ulg");
        std::fs::write(&path, &bytes).unwrap();

        let reader = UlogReader::open(&path).unwrap();
        assert_eq!(reader.log_start_timestamp(), 5);
        assert_eq!(reader.record_count(), 1);
    }
}
