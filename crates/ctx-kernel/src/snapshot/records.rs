//! Persisted record layouts
//!
//! Every record starts with its [`FormatHeader`] and then writes its fields
//! in a fixed order, with string markers between sections. Readers consume
//! fields in exactly the order they were written.
//!
//! Structural links are written in one of three ways, see [`ContextLink`].

use bytes::Bytes;
use ctx_codec::{read_list, read_opt, write_list, write_opt, CodecError, FormatHeader, RecordReader, RecordWriter, WireRecord};
use ctx_deploy::{ChainDescriptor, Flow, MetaDescriptor, SelfManagedEntry};
use ctx_props::PropertyMap;
use indexmap::IndexMap;
use serde::Serialize;

use crate::node::MessageFlags;
use crate::options::{EndpointReference, Options};

const REVISION: i32 = 1;

/// Service group context record header
pub const SERVICE_GROUP_FORMAT: FormatHeader = FormatHeader::new(0x5347_4358_0000_0001, REVISION);
/// Service context record header
pub const SERVICE_FORMAT: FormatHeader = FormatHeader::new(0x5356_4358_0000_0001, REVISION);
/// Operation context record header
pub const OPERATION_FORMAT: FormatHeader = FormatHeader::new(0x4f50_4358_0000_0001, REVISION);
/// Message context record header
pub const MESSAGE_FORMAT: FormatHeader = FormatHeader::new(0x4d53_4358_0000_0001, REVISION);

const SLOT_FORMAT: FormatHeader = FormatHeader::new(0x534c_4f54_0000_0001, REVISION);
const EMBEDDED_FORMAT: FormatHeader = FormatHeader::new(0x454d_4258_0000_0001, REVISION);

/// Kind written into isolated message slots
pub const SLOT_KIND: &str = "message";

/// How a record refers to a structural owner
#[derive(Debug, Clone, PartialEq)]
pub enum ContextLink<R> {
    /// No owner at this level
    Absent,
    /// Owner is the one reachable through an embedded ancestor record
    Parent,
    /// Owner is written in full
    Embedded(R),
}

impl<R> ContextLink<R> {
    /// Whether the owner is reached through an embedded ancestor
    #[inline]
    #[must_use]
    pub fn is_parent(&self) -> bool {
        matches!(self, Self::Parent)
    }

    /// Embedded record, if any
    #[must_use]
    pub fn embedded(&self) -> Option<&R> {
        match self {
            Self::Embedded(record) => Some(record),
            _ => None,
        }
    }
}

fn write_link<R: WireRecord>(writer: &mut RecordWriter, link: &ContextLink<R>) -> Result<(), CodecError> {
    match link {
        ContextLink::Absent => {
            writer.write_u8(0);
            Ok(())
        }
        ContextLink::Parent => {
            writer.write_u8(1);
            Ok(())
        }
        ContextLink::Embedded(record) => {
            writer.write_u8(2);
            record.encode(writer)
        }
    }
}

fn read_link<R: WireRecord>(reader: &mut RecordReader) -> Result<ContextLink<R>, CodecError> {
    match reader.read_u8()? {
        0 => Ok(ContextLink::Absent),
        1 => Ok(ContextLink::Parent),
        2 => R::decode(reader).map(ContextLink::Embedded),
        code => Err(CodecError::UnknownCode { field: "context link", code }),
    }
}

/// Saved service group context
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceGroupRecord {
    /// Log correlation id
    pub log_id: String,
    /// Group context id
    pub id: String,
    /// Last touch at capture time
    pub last_touched: i64,
    /// Local properties
    pub properties: PropertyMap,
    /// Deployed group
    pub group: MetaDescriptor,
}

impl WireRecord for ServiceGroupRecord {
    const HEADER: FormatHeader = SERVICE_GROUP_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.log_id)?;
        writer.write_str(&self.id)?;
        writer.write_i64(self.last_touched);
        writer.write_marker("properties")?;
        writer.write_properties(&self.properties)?;
        writer.write_marker("serviceGroup")?;
        self.group.encode(writer)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        let log_id = reader.read_str()?;
        let id = reader.read_str()?;
        let last_touched = reader.read_i64()?;
        reader.expect_marker("properties")?;
        let properties = reader.read_properties()?;
        reader.expect_marker("serviceGroup")?;
        Ok(Self {
            log_id,
            id,
            last_touched,
            properties,
            group: MetaDescriptor::decode(reader)?,
        })
    }
}

/// Saved service context
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    /// Log correlation id
    pub log_id: String,
    /// Id of the owning group context
    pub group_context_id: String,
    /// Endpoint the service sends to
    pub target_epr: Option<EndpointReference>,
    /// Endpoint the service is reached at
    pub my_epr: Option<EndpointReference>,
    /// Local properties
    pub properties: PropertyMap,
    /// Deployed service
    pub service: MetaDescriptor,
    /// Owning group context
    pub parent: Option<ServiceGroupRecord>,
}

impl WireRecord for ServiceRecord {
    const HEADER: FormatHeader = SERVICE_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.log_id)?;
        writer.write_str(&self.group_context_id)?;
        writer.write_json(&self.target_epr)?;
        writer.write_json(&self.my_epr)?;
        writer.write_marker("properties")?;
        writer.write_properties(&self.properties)?;
        writer.write_marker("service")?;
        self.service.encode(writer)?;
        writer.write_marker("parent")?;
        write_opt(writer, self.parent.as_ref())
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        let log_id = reader.read_str()?;
        let group_context_id = reader.read_str()?;
        let target_epr = reader.read_json()?;
        let my_epr = reader.read_json()?;
        reader.expect_marker("properties")?;
        let properties = reader.read_properties()?;
        reader.expect_marker("service")?;
        let service = MetaDescriptor::decode(reader)?;
        reader.expect_marker("parent")?;
        Ok(Self {
            log_id,
            group_context_id,
            target_epr,
            my_epr,
            properties,
            service,
            parent: read_opt(reader)?,
        })
    }
}

/// Placeholder for a message saved on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSlotRef {
    /// Always [`SLOT_KIND`]
    pub kind: String,
    /// Message id the slot waits for
    pub message_id: String,
    /// Label the message goes under
    pub label: String,
}

impl MessageSlotRef {
    /// Slot for `message_id` under `label`
    #[must_use]
    pub fn new(message_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: SLOT_KIND.to_string(),
            message_id: message_id.into(),
            label: label.into(),
        }
    }
}

impl WireRecord for MessageSlotRef {
    const HEADER: FormatHeader = SLOT_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.kind)?;
        writer.write_str(&self.message_id)?;
        writer.write_str(&self.label)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        Ok(Self {
            kind: reader.read_str()?,
            message_id: reader.read_str()?,
            label: reader.read_str()?,
        })
    }
}

/// Slim copy of a message embedded in its operation record
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedMessage {
    /// Label within the operation
    pub label: String,
    /// Message data without owners, envelope or handler data
    pub record: MessageRecord,
}

impl WireRecord for EmbeddedMessage {
    const HEADER: FormatHeader = EMBEDDED_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.label)?;
        self.record.encode(writer)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        Ok(Self {
            label: reader.read_str()?,
            record: MessageRecord::decode(reader)?,
        })
    }
}

/// Saved operation context
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Log correlation id
    pub log_id: String,
    /// Correlation key, if registered
    pub key: Option<String>,
    /// Completion flag
    pub complete: bool,
    /// Owning service name, for locating a live twin
    pub service_name: String,
    /// Owning group name, for locating a live twin
    pub group_name: String,
    /// Local properties
    pub properties: PropertyMap,
    /// Deployed operation
    pub operation: MetaDescriptor,
    /// Owning service context
    pub parent: Option<ServiceRecord>,
    /// Other messages of the exchange
    pub messages: Vec<EmbeddedMessage>,
    /// Messages saved on their own
    pub isolated: Vec<MessageSlotRef>,
}

impl WireRecord for OperationRecord {
    const HEADER: FormatHeader = OPERATION_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.log_id)?;
        writer.write_opt_str(self.key.as_deref())?;
        writer.write_bool(self.complete);
        writer.write_str(&self.service_name)?;
        writer.write_str(&self.group_name)?;
        writer.write_marker("properties")?;
        writer.write_properties(&self.properties)?;
        writer.write_marker("operation")?;
        self.operation.encode(writer)?;
        writer.write_marker("parent")?;
        write_opt(writer, self.parent.as_ref())?;
        writer.write_marker("messages")?;
        write_list(writer, &self.messages)?;
        writer.write_marker("isolatedMessages")?;
        write_list(writer, &self.isolated)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        let log_id = reader.read_str()?;
        let key = reader.read_opt_str()?;
        let complete = reader.read_bool()?;
        let service_name = reader.read_str()?;
        let group_name = reader.read_str()?;
        reader.expect_marker("properties")?;
        let properties = reader.read_properties()?;
        reader.expect_marker("operation")?;
        let operation = MetaDescriptor::decode(reader)?;
        reader.expect_marker("parent")?;
        let parent = read_opt(reader)?;
        reader.expect_marker("messages")?;
        let messages = read_list(reader)?;
        reader.expect_marker("isolatedMessages")?;
        Ok(Self {
            log_id,
            key,
            complete,
            service_name,
            group_name,
            properties,
            operation,
            parent,
            messages,
            isolated: read_list(reader)?,
        })
    }
}

/// Saved message context
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Log correlation id
    pub log_id: String,
    /// Flow the message travels through
    pub flow: Flow,
    /// Processing flags
    pub flags: MessageFlags,
    /// Addressing options, including the message id
    pub options: Options,
    /// Envelope bytes; dropped from slim copies
    pub envelope: Option<Bytes>,
    /// Content id -> attachment
    pub attachments: IndexMap<String, Bytes>,
    /// Execution chain descriptors
    pub execution_chain: Vec<ChainDescriptor>,
    /// Cursor into the execution chain
    pub current_handler_index: i32,
    /// Cursor into the current phase
    pub current_phase_index: i32,
    /// Executed phase descriptors in execution order
    pub executed_phases: Vec<ChainDescriptor>,
    /// Deployed service
    pub service: Option<MetaDescriptor>,
    /// Deployed operation
    pub operation: Option<MetaDescriptor>,
    /// Deployed message slot
    pub message: Option<MetaDescriptor>,
    /// Deployed service group
    pub service_group: Option<MetaDescriptor>,
    /// Inbound transport name
    pub transport_in: Option<String>,
    /// Outbound transport name
    pub transport_out: Option<String>,
    /// Session group context id to route to
    pub service_group_context_id: Option<String>,
    /// Local properties
    pub properties: PropertyMap,
    /// Owning operation context
    pub operation_context: Option<Box<OperationRecord>>,
    /// Owning service context
    pub service_context: ContextLink<ServiceRecord>,
    /// Owning group context
    pub service_group_context: ContextLink<ServiceGroupRecord>,
    /// Handler-owned blobs
    pub self_managed: Vec<SelfManagedEntry>,
}

impl MessageRecord {
    /// Message id from the options
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.options.message_id.as_deref()
    }
}

fn write_flags(writer: &mut RecordWriter, flags: &MessageFlags) {
    for flag in [
        flags.processing_fault,
        flags.paused,
        flags.output_written,
        flags.new_thread_required,
        flags.soap11,
        flags.rest,
        flags.mtom,
        flags.swa,
        flags.response_written,
        flags.server_side,
    ] {
        writer.write_bool(flag);
    }
}

fn read_flags(reader: &mut RecordReader) -> Result<MessageFlags, CodecError> {
    Ok(MessageFlags {
        processing_fault: reader.read_bool()?,
        paused: reader.read_bool()?,
        output_written: reader.read_bool()?,
        new_thread_required: reader.read_bool()?,
        soap11: reader.read_bool()?,
        rest: reader.read_bool()?,
        mtom: reader.read_bool()?,
        swa: reader.read_bool()?,
        response_written: reader.read_bool()?,
        server_side: reader.read_bool()?,
    })
}

impl WireRecord for MessageRecord {
    const HEADER: FormatHeader = MESSAGE_FORMAT;

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.log_id)?;
        writer.write_u8(self.flow.code());
        write_flags(writer, &self.flags);
        writer.write_i32(self.current_handler_index);
        writer.write_i32(self.current_phase_index);
        writer.write_opt_str(self.service_group_context_id.as_deref())?;
        writer.write_opt_str(self.transport_in.as_deref())?;
        writer.write_opt_str(self.transport_out.as_deref())?;

        writer.write_marker("options")?;
        writer.write_json(&self.options)?;
        writer.write_marker("envelope")?;
        writer.write_opt_bytes(self.envelope.as_deref())?;
        writer.write_marker("attachments")?;
        writer.write_len(self.attachments.len())?;
        for (content_id, data) in &self.attachments {
            writer.write_str(content_id)?;
            writer.write_bytes(data)?;
        }

        writer.write_marker("executionChain")?;
        write_list(writer, &self.execution_chain)?;
        writer.write_marker("executedPhases")?;
        write_list(writer, &self.executed_phases)?;

        writer.write_marker("descriptors")?;
        write_opt(writer, self.service.as_ref())?;
        write_opt(writer, self.operation.as_ref())?;
        write_opt(writer, self.message.as_ref())?;
        write_opt(writer, self.service_group.as_ref())?;

        writer.write_marker("properties")?;
        writer.write_properties(&self.properties)?;

        writer.write_marker("operationContext")?;
        write_opt(writer, self.operation_context.as_deref())?;
        writer.write_marker("serviceContext")?;
        write_link(writer, &self.service_context)?;
        writer.write_marker("serviceGroupContext")?;
        write_link(writer, &self.service_group_context)?;

        writer.write_marker("selfManagedData")?;
        write_list(writer, &self.self_managed)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        let log_id = reader.read_str()?;
        let code = reader.read_u8()?;
        let flow = Flow::from_code(code).ok_or(CodecError::UnknownCode { field: "flow", code })?;
        let flags = read_flags(reader)?;
        let current_handler_index = reader.read_i32()?;
        let current_phase_index = reader.read_i32()?;
        let service_group_context_id = reader.read_opt_str()?;
        let transport_in = reader.read_opt_str()?;
        let transport_out = reader.read_opt_str()?;

        reader.expect_marker("options")?;
        let options = reader.read_json()?;
        reader.expect_marker("envelope")?;
        let envelope = reader.read_opt_bytes()?;
        reader.expect_marker("attachments")?;
        let count = reader.read_len()?;
        let mut attachments = IndexMap::with_capacity(count.min(64));
        for _ in 0..count {
            let content_id = reader.read_str()?;
            attachments.insert(content_id, reader.read_bytes()?);
        }

        reader.expect_marker("executionChain")?;
        let execution_chain = read_list(reader)?;
        reader.expect_marker("executedPhases")?;
        let executed_phases = read_list(reader)?;

        reader.expect_marker("descriptors")?;
        let service = read_opt(reader)?;
        let operation = read_opt(reader)?;
        let message = read_opt(reader)?;
        let service_group = read_opt(reader)?;

        reader.expect_marker("properties")?;
        let properties = reader.read_properties()?;

        reader.expect_marker("operationContext")?;
        let operation_context = read_opt::<OperationRecord>(reader)?.map(Box::new);
        reader.expect_marker("serviceContext")?;
        let service_context = read_link(reader)?;
        reader.expect_marker("serviceGroupContext")?;
        let service_group_context = read_link(reader)?;

        reader.expect_marker("selfManagedData")?;
        Ok(Self {
            log_id,
            flow,
            flags,
            options,
            envelope,
            attachments,
            execution_chain,
            current_handler_index,
            current_phase_index,
            executed_phases,
            service,
            operation,
            message,
            service_group,
            transport_in,
            transport_out,
            service_group_context_id,
            properties,
            operation_context,
            service_context,
            service_group_context,
            self_managed: read_list(reader)?,
        })
    }
}

/// Printable overview of a message record
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    /// Log correlation id
    pub log_id: String,
    /// Message id
    pub message_id: Option<String>,
    /// Flow
    pub flow: Flow,
    /// Service name
    pub service: Option<String>,
    /// Operation name
    pub operation: Option<String>,
    /// Handlers and phases in the execution chain, nested ones included
    pub chain_length: usize,
    /// Executed phases
    pub executed_phases: usize,
    /// Owners of saved handler blobs
    pub self_managed: Vec<String>,
    /// Local property keys
    pub properties: Vec<String>,
    /// Correlation key of the owning operation context
    pub operation_key: Option<String>,
    /// Labels of embedded sibling messages
    pub embedded_labels: Vec<String>,
    /// Labels of isolated messages
    pub isolated_labels: Vec<String>,
}

fn count_descriptors(descriptors: &[ChainDescriptor]) -> usize {
    descriptors
        .iter()
        .map(|descriptor| 1 + count_descriptors(&descriptor.children))
        .sum()
}

impl MessageRecord {
    /// Overview for display
    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        let operation_context = self.operation_context.as_deref();
        RecordSummary {
            log_id: self.log_id.clone(),
            message_id: self.message_id().map(str::to_string),
            flow: self.flow,
            service: self.service.as_ref().map(|d| d.name.clone()),
            operation: self.operation.as_ref().map(|d| d.name.clone()),
            chain_length: count_descriptors(&self.execution_chain),
            executed_phases: self.executed_phases.len(),
            self_managed: self
                .self_managed
                .iter()
                .map(|entry| format!("{}/{}", entry.kind, entry.name))
                .collect(),
            properties: self.properties.keys().cloned().collect(),
            operation_key: operation_context.and_then(|op| op.key.clone()),
            embedded_labels: operation_context
                .map(|op| op.messages.iter().map(|m| m.label.clone()).collect())
                .unwrap_or_default(),
            isolated_labels: operation_context
                .map(|op| op.isolated.iter().map(|slot| slot.label.clone()).collect())
                .unwrap_or_default(),
        }
    }
}
