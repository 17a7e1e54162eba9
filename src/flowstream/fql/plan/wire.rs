//! Tagged binary wire format for plans and rows.
//!
//! A plan message is a magic/version header followed by the node arena in
//! index order. Each node is a sequence of tagged, length-prefixed sections
//! terminated by an end marker; readers skip section tags they do not know,
//! which is what keeps old readers working against newer writers. Enum
//! values travel as single-byte ordinals with stable values; an ordinal
//! outside the known set is rejected, never guessed.
//!
//! Rows reuse the same framing: the layout of the group and payload value
//! lists is dictated by the per-query generated row schema, so the row
//! messages themselves carry only type ordinals and values.

use bytes::{BufMut, BytesMut};

use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::types::{EgressRow, Group, Value};
use crate::flowstream::fql::plan::{
    Call, Comparator, FieldConstantCondition, FieldType, FieldUsage, Node, OperatorType, Plan,
    PlanField,
};

const PLAN_MAGIC: u32 = 0x46514C50; // "FQLP"
const ROW_MAGIC: u32 = 0x46514C52; // "FQLR"
const WIRE_VERSION: u8 = 1;

// Node section tags. Zero terminates a node.
const SECTION_END: u8 = 0;
const SECTION_FIELDS: u8 = 1;
const SECTION_GROUP_FIELDS: u8 = 2;
const SECTION_CONDITIONS: u8 = 3;
const SECTION_CALLS: u8 = 4;
const SECTION_PROPERTIES: u8 = 5;
const SECTION_SESSION_OPEN: u8 = 6;
const SECTION_SESSION_CLOSE: u8 = 7;
const SECTION_CHILD: u8 = 8;

// Row section tags.
const SECTION_GROUP: u8 = 1;
const SECTION_PAYLOAD: u8 = 2;

impl Plan {
    /// Serialize the plan. Byte-for-byte reproducible for identical trees
    /// with identical field ordering.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(PLAN_MAGIC);
        buf.put_u8(WIRE_VERSION);
        buf.put_u32(self.nodes.len() as u32);
        for node in &self.nodes {
            write_node(&mut buf, node);
        }
        buf.to_vec()
    }

    /// Deserialize and structurally validate a plan.
    pub fn from_wire_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let mut r = WireReader::new(bytes);
        if r.read_u32()? != PLAN_MAGIC {
            return Err(EngineError::malformed_plan("bad plan magic"));
        }
        let version = r.read_u8()?;
        if version != WIRE_VERSION {
            return Err(EngineError::malformed_plan(format!(
                "unsupported plan version {}",
                version
            )));
        }
        let count = r.read_u32()? as usize;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(read_node(&mut r)?);
        }
        if !r.is_empty() {
            return Err(EngineError::malformed_plan("trailing bytes after plan"));
        }
        let plan = Plan::new(nodes);
        plan.validate()?;
        Ok(plan)
    }
}

fn write_node(buf: &mut BytesMut, node: &Node) {
    buf.put_i64(node.id);
    buf.put_u8(node.operator.ordinal());

    if !node.fields.is_empty() {
        write_section(buf, SECTION_FIELDS, |b| write_fields(b, &node.fields));
    }
    if !node.group_fields.is_empty() {
        write_section(buf, SECTION_GROUP_FIELDS, |b| {
            write_fields(b, &node.group_fields)
        });
    }
    if !node.conditions.is_empty() {
        write_section(buf, SECTION_CONDITIONS, |b| {
            write_conditions(b, &node.conditions)
        });
    }
    if !node.calls.is_empty() {
        write_section(buf, SECTION_CALLS, |b| write_calls(b, &node.calls));
    }
    if !node.properties.is_empty() {
        write_section(buf, SECTION_PROPERTIES, |b| {
            b.put_u32(node.properties.len() as u32);
            for p in &node.properties {
                write_string(b, p);
            }
        });
    }
    if !node.session_open_conditions.is_empty() {
        write_section(buf, SECTION_SESSION_OPEN, |b| {
            write_conditions(b, &node.session_open_conditions)
        });
    }
    if !node.session_close_conditions.is_empty() {
        write_section(buf, SECTION_SESSION_CLOSE, |b| {
            write_conditions(b, &node.session_close_conditions)
        });
    }
    if let Some(child) = node.child {
        write_section(buf, SECTION_CHILD, |b| b.put_u32(child as u32));
    }
    buf.put_u8(SECTION_END);
}

fn read_node(r: &mut WireReader<'_>) -> EngineResult<Node> {
    let id = r.read_i64()?;
    let operator = OperatorType::from_ordinal(r.read_u8()?)?;
    let mut node = Node::new(id, operator);

    loop {
        let tag = r.read_u8()?;
        if tag == SECTION_END {
            break;
        }
        let len = r.read_u32()? as usize;
        let mut section = r.sub_reader(len)?;
        match tag {
            SECTION_FIELDS => node.fields = read_fields(&mut section)?,
            SECTION_GROUP_FIELDS => node.group_fields = read_fields(&mut section)?,
            SECTION_CONDITIONS => node.conditions = read_conditions(&mut section)?,
            SECTION_CALLS => node.calls = read_calls(&mut section)?,
            SECTION_PROPERTIES => {
                let count = section.read_u32()? as usize;
                let mut props = Vec::with_capacity(count);
                for _ in 0..count {
                    props.push(section.read_string()?);
                }
                node.properties = props;
            }
            SECTION_SESSION_OPEN => node.session_open_conditions = read_conditions(&mut section)?,
            SECTION_SESSION_CLOSE => {
                node.session_close_conditions = read_conditions(&mut section)?
            }
            SECTION_CHILD => node.child = Some(section.read_u32()? as usize),
            // Unknown optional section from a newer writer: skip it.
            _ => continue,
        }
        if !section.is_empty() {
            return Err(EngineError::malformed_plan(format!(
                "section {} has trailing bytes",
                tag
            )));
        }
    }
    Ok(node)
}

fn write_section(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    let mut section = BytesMut::new();
    body(&mut section);
    buf.put_u8(tag);
    buf.put_u32(section.len() as u32);
    buf.extend_from_slice(&section);
}

fn write_fields(buf: &mut BytesMut, fields: &[PlanField]) {
    buf.put_u32(fields.len() as u32);
    for f in fields {
        write_string(buf, &f.name);
        buf.put_u8(f.field_type.ordinal());
        buf.put_u8(f.usage.ordinal());
    }
}

fn read_fields(r: &mut WireReader<'_>) -> EngineResult<Vec<PlanField>> {
    let count = r.read_u32()? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_string()?;
        let field_type = FieldType::from_ordinal(r.read_u8()?)?;
        let usage = FieldUsage::from_ordinal(r.read_u8()?)?;
        fields.push(PlanField {
            name,
            field_type,
            usage,
        });
    }
    Ok(fields)
}

fn write_conditions(buf: &mut BytesMut, conditions: &[FieldConstantCondition]) {
    buf.put_u32(conditions.len() as u32);
    for c in conditions {
        write_string(buf, &c.field_name);
        buf.put_u8(c.comparator.ordinal());
        write_string(buf, &c.constant);
    }
}

fn read_conditions(r: &mut WireReader<'_>) -> EngineResult<Vec<FieldConstantCondition>> {
    let count = r.read_u32()? as usize;
    let mut conditions = Vec::with_capacity(count);
    for _ in 0..count {
        let field_name = r.read_string()?;
        let comparator = Comparator::from_ordinal(r.read_u8()?)?;
        let constant = r.read_string()?;
        conditions.push(FieldConstantCondition {
            field_name,
            comparator,
            constant,
        });
    }
    Ok(conditions)
}

fn write_calls(buf: &mut BytesMut, calls: &[Call]) {
    buf.put_u32(calls.len() as u32);
    for call in calls {
        write_string(buf, &call.function);
        write_fields(buf, &call.input_fields);
    }
}

fn read_calls(r: &mut WireReader<'_>) -> EngineResult<Vec<Call>> {
    let count = r.read_u32()? as usize;
    let mut calls = Vec::with_capacity(count);
    for _ in 0..count {
        let function = r.read_string()?;
        let input_fields = read_fields(r)?;
        calls.push(Call {
            function,
            input_fields,
        });
    }
    Ok(calls)
}

fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Encode an egress row against its generated schema layout.
pub fn encode_egress_row(
    row: &EgressRow,
    group_types: &[FieldType],
    payload_types: &[FieldType],
) -> EngineResult<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u32(ROW_MAGIC);
    buf.put_u8(WIRE_VERSION);
    let group = encode_values(row.group.values(), group_types)?;
    write_section(&mut buf, SECTION_GROUP, |b| b.extend_from_slice(&group));
    let payload = encode_values(&row.payload, payload_types)?;
    write_section(&mut buf, SECTION_PAYLOAD, |b| b.extend_from_slice(&payload));
    buf.put_u8(SECTION_END);
    Ok(buf.to_vec())
}

/// Decode an egress row against its generated schema layout.
pub fn decode_egress_row(
    bytes: &[u8],
    group_types: &[FieldType],
    payload_types: &[FieldType],
) -> EngineResult<EgressRow> {
    let mut r = WireReader::new(bytes);
    if r.read_u32()? != ROW_MAGIC {
        return Err(EngineError::malformed_plan("bad row magic"));
    }
    let version = r.read_u8()?;
    if version != WIRE_VERSION {
        return Err(EngineError::malformed_plan(format!(
            "unsupported row version {}",
            version
        )));
    }

    let mut group = None;
    let mut payload = None;
    loop {
        let tag = r.read_u8()?;
        if tag == SECTION_END {
            break;
        }
        let len = r.read_u32()? as usize;
        let mut section = r.sub_reader(len)?;
        match tag {
            SECTION_GROUP => group = Some(decode_values(&mut section, group_types)?),
            SECTION_PAYLOAD => payload = Some(decode_values(&mut section, payload_types)?),
            _ => continue,
        }
        if !section.is_empty() {
            return Err(EngineError::malformed_plan(format!(
                "row section {} has trailing bytes",
                tag
            )));
        }
    }

    Ok(EgressRow {
        group: Group::new(group.unwrap_or_default()),
        payload: payload
            .ok_or_else(|| EngineError::malformed_plan("row message missing payload section"))?,
    })
}

fn encode_values(values: &[Value], types: &[FieldType]) -> EngineResult<Vec<u8>> {
    if values.len() != types.len() {
        return Err(EngineError::conversion(format!(
            "row has {} values but schema declares {}",
            values.len(),
            types.len()
        )));
    }
    let mut buf = BytesMut::new();
    buf.put_u32(values.len() as u32);
    for (value, expected) in values.iter().zip(types) {
        if value.field_type() != *expected {
            return Err(EngineError::conversion(format!(
                "value {} does not match schema type {}",
                value,
                expected.as_str()
            )));
        }
        buf.put_u8(expected.ordinal());
        match value {
            Value::Bool(b) => buf.put_u8(u8::from(*b)),
            Value::Int64(i) => buf.put_i64(*i),
            Value::Float64(f) => buf.put_u64(f.to_bits()),
            Value::Text(s) => write_string(&mut buf, s),
        }
    }
    Ok(buf.to_vec())
}

fn decode_values(r: &mut WireReader<'_>, types: &[FieldType]) -> EngineResult<Vec<Value>> {
    let count = r.read_u32()? as usize;
    if count != types.len() {
        return Err(EngineError::malformed_plan(format!(
            "row carries {} values but schema declares {}",
            count,
            types.len()
        )));
    }
    let mut values = Vec::with_capacity(count);
    for expected in types {
        let field_type = FieldType::from_ordinal(r.read_u8()?)?;
        if field_type != *expected {
            return Err(EngineError::malformed_plan(format!(
                "row value typed {} where schema declares {}",
                field_type.as_str(),
                expected.as_str()
            )));
        }
        let value = match field_type {
            FieldType::Boolean => Value::Bool(r.read_u8()? != 0),
            FieldType::Integer64 => Value::Int64(r.read_i64()?),
            FieldType::Float64 => Value::Float64(f64::from_bits(r.read_u64()?)),
            FieldType::Text => Value::Text(r.read_string()?),
        };
        values.push(value);
    }
    Ok(values)
}

/// Bounds-checked cursor over a wire message.
struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(EngineError::malformed_plan(format!(
                "message truncated: need {} bytes, have {}",
                n,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn sub_reader(&mut self, len: usize) -> EngineResult<WireReader<'a>> {
        Ok(WireReader::new(self.take(len)?))
    }

    fn read_u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> EngineResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> EngineResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> EngineResult<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_string(&mut self) -> EngineResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EngineError::malformed_plan("string is not valid UTF-8"))
    }
}
