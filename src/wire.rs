//! DNS报文编解码
//!
//! 头部、域名（解码支持压缩指针）、资源记录与EDNS0 OPT伪记录的
//! 序列化与反序列化。DNSSEC记录类型按原始字节透传。

use crate::types::{EdnsRecord, Flags, Message, Query, Record, RecordData, RecordType, SecurityLevel};
use crate::{DnsError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

/// 序列化DNS报文为字节
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(512);

    let additional_count = message.additionals.len() + usize::from(message.edns.is_some());

    // DNS头部 (12字节)
    buffer.extend_from_slice(&message.id.to_be_bytes());
    buffer.extend_from_slice(&encode_flags(&message.flags).to_be_bytes());
    buffer.extend_from_slice(&(message.queries.len() as u16).to_be_bytes());
    buffer.extend_from_slice(&(message.answers.len() as u16).to_be_bytes());
    buffer.extend_from_slice(&(message.authorities.len() as u16).to_be_bytes());
    buffer.extend_from_slice(&(additional_count as u16).to_be_bytes());

    // 查询部分
    for query in &message.queries {
        encode_name(&query.name, &mut buffer)?;
        buffer.extend_from_slice(&u16::from(query.qtype).to_be_bytes());
        buffer.extend_from_slice(&u16::from(query.qclass).to_be_bytes());
    }

    // 回答、权威、附加部分
    for record in &message.answers {
        encode_record(record, &mut buffer)?;
    }
    for record in &message.authorities {
        encode_record(record, &mut buffer)?;
    }

    // EDNS0 OPT伪记录写在显式附加记录之前，保证TSIG记录
    // （若有）落在报文最后
    if let Some(edns) = &message.edns {
        encode_opt(edns, &mut buffer);
    }
    for record in &message.additionals {
        encode_record(record, &mut buffer)?;
    }

    Ok(buffer)
}

/// 反序列化DNS报文
pub fn decode_message(data: &[u8]) -> Result<Message> {
    if data.len() < 12 {
        return Err(DnsError::Protocol("Message too short".to_string()));
    }

    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = decode_flags(u16::from_be_bytes([data[2], data[3]]));

    let qdcount = u16::from_be_bytes([data[4], data[5]]);
    let ancount = u16::from_be_bytes([data[6], data[7]]);
    let nscount = u16::from_be_bytes([data[8], data[9]]);
    let arcount = u16::from_be_bytes([data[10], data[11]]);

    let mut offset = 12;
    let mut queries = Vec::new();
    let mut answers = Vec::new();
    let mut authorities = Vec::new();
    let mut additionals = Vec::new();
    let mut edns = None;

    for _ in 0..qdcount {
        let (query, new_offset) = parse_query(data, offset)?;
        queries.push(query);
        offset = new_offset;
    }

    for _ in 0..ancount {
        let (record, new_offset) = parse_record(data, offset)?;
        answers.push(record);
        offset = new_offset;
    }

    for _ in 0..nscount {
        let (record, new_offset) = parse_record(data, offset)?;
        authorities.push(record);
        offset = new_offset;
    }

    for _ in 0..arcount {
        let (raw, new_offset) = parse_raw_record(data, offset)?;
        offset = new_offset;
        if RecordType::from(raw.rtype) == RecordType::OPT {
            // OPT伪记录的CLASS字段承载UDP载荷大小，TTL字段承载
            // 扩展RCODE/版本/DO位
            edns = Some(EdnsRecord {
                udp_payload_size: raw.class,
                extended_rcode: (raw.ttl >> 24) as u8,
                version: (raw.ttl >> 16) as u8,
                dnssec_ok: (raw.ttl & 0x8000) != 0,
            });
        } else {
            additionals.push(raw.into_record(data)?);
        }
    }

    Ok(Message {
        id,
        flags,
        queries,
        answers,
        authorities,
        additionals,
        edns,
        security_level: SecurityLevel::Unchecked,
    })
}

fn encode_flags(flags: &Flags) -> u16 {
    let mut value = 0u16;
    if flags.qr {
        value |= 0x8000;
    }
    value |= (flags.opcode as u16 & 0x0F) << 11;
    if flags.aa {
        value |= 0x0400;
    }
    if flags.tc {
        value |= 0x0200;
    }
    if flags.rd {
        value |= 0x0100;
    }
    if flags.ra {
        value |= 0x0080;
    }
    if flags.z {
        value |= 0x0040;
    }
    if flags.ad {
        value |= 0x0020;
    }
    if flags.cd {
        value |= 0x0010;
    }
    value |= flags.rcode as u16 & 0x0F;
    value
}

fn decode_flags(value: u16) -> Flags {
    Flags {
        qr: (value & 0x8000) != 0,
        opcode: ((value >> 11) & 0x0F) as u8,
        aa: (value & 0x0400) != 0,
        tc: (value & 0x0200) != 0,
        rd: (value & 0x0100) != 0,
        ra: (value & 0x0080) != 0,
        z: (value & 0x0040) != 0,
        ad: (value & 0x0020) != 0,
        cd: (value & 0x0010) != 0,
        rcode: (value & 0x0F) as u8,
    }
}

/// 编码域名
pub fn encode_name(name: &str, buffer: &mut Vec<u8>) -> Result<()> {
    if name.is_empty() || name == "." {
        buffer.push(0);
        return Ok(());
    }

    let name = name.trim_end_matches('.');

    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(DnsError::Protocol("Label too long".to_string()));
        }
        buffer.push(label.len() as u8);
        buffer.extend_from_slice(label.as_bytes());
    }

    buffer.push(0);
    Ok(())
}

/// 解析域名（支持压缩指针）
pub fn parse_name(data: &[u8], mut offset: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut jumped = false;
    let mut jump_offset = 0;
    let mut loop_count = 0;
    const MAX_LOOPS: usize = 100; // 防止压缩指针循环引用

    loop {
        loop_count += 1;
        if loop_count > MAX_LOOPS {
            return Err(DnsError::Protocol("Name parsing loop detected".to_string()));
        }

        if offset >= data.len() {
            return Err(DnsError::Protocol("Name parsing overflow".to_string()));
        }

        let len = data[offset];

        if len == 0 {
            offset += 1;
            break;
        }

        if (len & 0xC0) == 0xC0 {
            // 压缩指针
            if offset + 1 >= data.len() {
                return Err(DnsError::Protocol(
                    "Incomplete compression pointer".to_string(),
                ));
            }

            let pointer = (((len & 0x3F) as usize) << 8) | (data[offset + 1] as usize);
            if pointer >= data.len() {
                return Err(DnsError::Protocol(
                    "Invalid compression pointer".to_string(),
                ));
            }

            if !jumped {
                jump_offset = offset + 2;
                jumped = true;
            }

            offset = pointer;
            continue;
        }

        if len > 63 {
            return Err(DnsError::Protocol("Label too long".to_string()));
        }

        offset += 1;
        if offset + len as usize > data.len() {
            return Err(DnsError::Protocol("Name label overflow".to_string()));
        }

        if !name.is_empty() {
            name.push('.');
        }

        name.push_str(&String::from_utf8_lossy(&data[offset..offset + len as usize]));
        offset += len as usize;
    }

    if jumped {
        offset = jump_offset;
    }

    Ok((name, offset))
}

/// 解析查询记录
pub fn parse_query(data: &[u8], offset: usize) -> Result<(Query, usize)> {
    let (name, mut offset) = parse_name(data, offset)?;

    if offset + 4 > data.len() {
        return Err(DnsError::Protocol("Invalid query format".to_string()));
    }

    let qtype = u16::from_be_bytes([data[offset], data[offset + 1]]).into();
    let qclass = u16::from_be_bytes([data[offset + 2], data[offset + 3]]).into();
    offset += 4;

    Ok((Query { name, qtype, qclass }, offset))
}

/// 资源记录的原始视图
///
/// OPT/TSIG伪记录复用CLASS与TTL字段承载非类别语义，解析附加部分时
/// 需要先拿到原始值再分类。
struct RawRecord {
    name: String,
    rtype: u16,
    class: u16,
    ttl: u32,
    data_offset: usize,
    data_len: usize,
}

impl RawRecord {
    fn into_record(self, full_data: &[u8]) -> Result<Record> {
        let rtype = RecordType::from(self.rtype);
        let rdata = &full_data[self.data_offset..self.data_offset + self.data_len];
        let data = parse_record_data(rtype, rdata, full_data, self.data_offset)?;
        Ok(Record {
            name: self.name,
            rtype,
            class: self.class.into(),
            ttl: self.ttl,
            data,
        })
    }
}

fn parse_raw_record(data: &[u8], offset: usize) -> Result<(RawRecord, usize)> {
    let (name, mut offset) = parse_name(data, offset)?;

    if offset + 10 > data.len() {
        return Err(DnsError::Protocol("Invalid record format".to_string()));
    }

    let rtype = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let class = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
    let ttl = u32::from_be_bytes([
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ]);
    let rdlength = u16::from_be_bytes([data[offset + 8], data[offset + 9]]) as usize;
    offset += 10;

    if offset + rdlength > data.len() {
        return Err(DnsError::Protocol("Invalid record data length".to_string()));
    }

    let raw = RawRecord {
        name,
        rtype,
        class,
        ttl,
        data_offset: offset,
        data_len: rdlength,
    };
    offset += rdlength;

    Ok((raw, offset))
}

/// 解析资源记录
pub fn parse_record(data: &[u8], offset: usize) -> Result<(Record, usize)> {
    let (raw, offset) = parse_raw_record(data, offset)?;
    Ok((raw.into_record(data)?, offset))
}

/// 编码资源记录
pub fn encode_record(record: &Record, buffer: &mut Vec<u8>) -> Result<()> {
    encode_name(&record.name, buffer)?;

    buffer.extend_from_slice(&u16::from(record.rtype).to_be_bytes());
    buffer.extend_from_slice(&u16::from(record.class).to_be_bytes());
    buffer.extend_from_slice(&record.ttl.to_be_bytes());

    let data_bytes = encode_record_data(&record.data)?;
    buffer.extend_from_slice(&(data_bytes.len() as u16).to_be_bytes());
    buffer.extend_from_slice(&data_bytes);

    Ok(())
}

/// 编码记录数据
pub fn encode_record_data(data: &RecordData) -> Result<Vec<u8>> {
    match data {
        RecordData::A(ip) => Ok(ip.octets().to_vec()),
        RecordData::AAAA(ip) => Ok(ip.octets().to_vec()),
        RecordData::CNAME(name) | RecordData::NS(name) | RecordData::PTR(name) => {
            let mut buffer = Vec::new();
            encode_name(name, &mut buffer)?;
            Ok(buffer)
        }
        RecordData::MX { priority, exchange } => {
            let mut buffer = Vec::new();
            buffer.extend_from_slice(&priority.to_be_bytes());
            encode_name(exchange, &mut buffer)?;
            Ok(buffer)
        }
        RecordData::TXT(texts) => {
            let mut buffer = Vec::new();
            for text in texts {
                if text.len() > 255 {
                    return Err(DnsError::Protocol("TXT record too long".to_string()));
                }
                buffer.push(text.len() as u8);
                buffer.extend_from_slice(text.as_bytes());
            }
            Ok(buffer)
        }
        RecordData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            let mut buffer = Vec::new();
            encode_name(mname, &mut buffer)?;
            encode_name(rname, &mut buffer)?;
            buffer.extend_from_slice(&serial.to_be_bytes());
            buffer.extend_from_slice(&refresh.to_be_bytes());
            buffer.extend_from_slice(&retry.to_be_bytes());
            buffer.extend_from_slice(&expire.to_be_bytes());
            buffer.extend_from_slice(&minimum.to_be_bytes());
            Ok(buffer)
        }
        RecordData::SRV {
            priority,
            weight,
            port,
            target,
        } => {
            let mut buffer = Vec::new();
            buffer.extend_from_slice(&priority.to_be_bytes());
            buffer.extend_from_slice(&weight.to_be_bytes());
            buffer.extend_from_slice(&port.to_be_bytes());
            encode_name(target, &mut buffer)?;
            Ok(buffer)
        }
        RecordData::Unknown(data) => Ok(data.clone()),
    }
}

/// 解析记录数据
pub fn parse_record_data(
    rtype: RecordType,
    rdata: &[u8],
    full_data: &[u8],
    rdata_offset: usize,
) -> Result<RecordData> {
    match rtype {
        RecordType::A => {
            if rdata.len() != 4 {
                return Err(DnsError::Protocol("Invalid A record length".to_string()));
            }
            Ok(RecordData::A(Ipv4Addr::new(
                rdata[0], rdata[1], rdata[2], rdata[3],
            )))
        }
        RecordType::AAAA => {
            if rdata.len() != 16 {
                return Err(DnsError::Protocol("Invalid AAAA record length".to_string()));
            }
            let mut addr = [0u8; 16];
            addr.copy_from_slice(rdata);
            Ok(RecordData::AAAA(Ipv6Addr::from(addr)))
        }
        RecordType::CNAME | RecordType::NS | RecordType::PTR => {
            // 域名可能带压缩指针，必须用完整报文的偏移量来解析
            let (name, _) = parse_name(full_data, rdata_offset)?;
            match rtype {
                RecordType::CNAME => Ok(RecordData::CNAME(name)),
                RecordType::NS => Ok(RecordData::NS(name)),
                RecordType::PTR => Ok(RecordData::PTR(name)),
                _ => unreachable!(),
            }
        }
        RecordType::MX => {
            if rdata.len() < 3 {
                return Err(DnsError::Protocol("Invalid MX record length".to_string()));
            }
            let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
            let (exchange, _) = parse_name(full_data, rdata_offset + 2)?;
            Ok(RecordData::MX { priority, exchange })
        }
        RecordType::TXT => {
            let mut texts = Vec::new();
            let mut offset = 0;
            while offset < rdata.len() {
                let len = rdata[offset] as usize;
                offset += 1;
                if offset + len > rdata.len() {
                    return Err(DnsError::Protocol("Invalid TXT record format".to_string()));
                }
                texts.push(String::from_utf8_lossy(&rdata[offset..offset + len]).to_string());
                offset += len;
            }
            Ok(RecordData::TXT(texts))
        }
        // DNSSEC记录与其余类型按原始字节透传
        _ => Ok(RecordData::Unknown(rdata.to_vec())),
    }
}

/// 编码EDNS0 OPT伪记录
pub fn encode_opt(edns: &EdnsRecord, buffer: &mut Vec<u8>) {
    // NAME: 根域
    buffer.push(0x00);
    // TYPE: OPT (41)
    buffer.extend_from_slice(&u16::from(RecordType::OPT).to_be_bytes());
    // CLASS: UDP载荷大小
    buffer.extend_from_slice(&edns.udp_payload_size.to_be_bytes());
    // TTL: 扩展RCODE(1) + 版本(1) + DO位与保留位(2)
    buffer.push(edns.extended_rcode);
    buffer.push(edns.version);
    let flags: u16 = if edns.dnssec_ok { 0x8000 } else { 0 };
    buffer.extend_from_slice(&flags.to_be_bytes());
    // RDLENGTH: 无选项数据
    buffer.extend_from_slice(&0u16.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QClass;

    #[test]
    fn test_query_message_roundtrip() {
        let mut message = Message::new_query("example.com", RecordType::A, QClass::IN);
        message.id = 0x1234;
        message.flags.cd = true;
        message.edns = Some(EdnsRecord {
            udp_payload_size: 4096,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: true,
        });

        let bytes = encode_message(&message).unwrap();
        let decoded = decode_message(&bytes).unwrap();

        assert_eq!(decoded.id, 0x1234);
        assert!(decoded.flags.cd);
        assert!(!decoded.flags.qr);
        assert_eq!(decoded.queries.len(), 1);
        assert_eq!(decoded.queries[0].name, "example.com");
        let edns = decoded.edns.expect("OPT record present");
        assert_eq!(edns.udp_payload_size, 4096);
        assert!(edns.dnssec_ok);
    }

    #[test]
    fn test_parse_name_with_compression_pointer() {
        // 头部12字节 + "foo.bar" + 指向它的压缩指针
        let mut data = vec![0u8; 12];
        data.extend_from_slice(&[3, b'f', b'o', b'o', 3, b'b', b'a', b'r', 0]);
        let pointer_offset = data.len();
        data.extend_from_slice(&[0xC0, 12]);

        let (name, next) = parse_name(&data, pointer_offset).unwrap();
        assert_eq!(name, "foo.bar");
        assert_eq!(next, pointer_offset + 2);
    }

    #[test]
    fn test_parse_name_rejects_pointer_loop() {
        let mut data = vec![0u8; 12];
        let loop_offset = data.len();
        data.extend_from_slice(&[0xC0, loop_offset as u8]);

        assert!(parse_name(&data, loop_offset).is_err());
    }

    #[test]
    fn test_ad_cd_flag_bits() {
        let flags = Flags {
            ad: true,
            cd: true,
            ..Flags::default()
        };
        let raw = encode_flags(&flags);
        assert_eq!(raw & 0x0020, 0x0020);
        assert_eq!(raw & 0x0010, 0x0010);
        let back = decode_flags(raw);
        assert!(back.ad && back.cd && back.rd);
    }
}
