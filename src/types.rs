//! DNS核心类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// DNS报文
///
/// 查询与响应共用同一结构。发往上游前，引擎会为每个子查询分配
/// 新的事务ID；除此之外报文在发送与返回之间不被修改。
/// 验证器完成后会把安全级别写回 `security_level` 字段。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// 事务ID
    pub id: u16,
    /// 标志位
    pub flags: Flags,
    /// 查询问题
    pub queries: Vec<Query>,
    /// 回答记录
    pub answers: Vec<Record>,
    /// 权威记录
    pub authorities: Vec<Record>,
    /// 附加记录
    pub additionals: Vec<Record>,
    /// EDNS0伪记录（OPT）
    pub edns: Option<EdnsRecord>,
    /// DNSSEC验证结论
    pub security_level: SecurityLevel,
}

impl Message {
    /// 构造一个标准查询报文
    pub fn new_query(name: impl Into<String>, qtype: RecordType, qclass: QClass) -> Self {
        Self {
            id: 0,
            flags: Flags::default(),
            queries: vec![Query {
                name: name.into(),
                qtype,
                qclass,
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            edns: None,
            security_level: SecurityLevel::Unchecked,
        }
    }

    /// 首个查询问题
    pub fn question(&self) -> Option<&Query> {
        self.queries.first()
    }

    /// 响应码
    pub fn rcode(&self) -> ResponseCode {
        ResponseCode::from(self.flags.rcode)
    }

    /// 是否为响应报文
    pub fn is_response(&self) -> bool {
        self.flags.qr
    }
}

/// DNS查询问题
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    /// 查询名称
    pub name: String,
    /// 查询类型
    pub qtype: RecordType,
    /// 查询类别
    pub qclass: QClass,
}

/// DNS资源记录
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 记录名称
    pub name: String,
    /// 记录类型
    pub rtype: RecordType,
    /// 记录类别
    pub class: QClass,
    /// 生存时间(秒)
    pub ttl: u32,
    /// 记录数据
    pub data: RecordData,
}

/// DNS记录数据
///
/// DNSSEC相关类型（RRSIG/DNSKEY/DS/NSEC等）对本引擎是不透明的，
/// 按原始字节透传给验证器。
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    /// A记录 - IPv4地址
    A(Ipv4Addr),
    /// AAAA记录 - IPv6地址
    AAAA(Ipv6Addr),
    /// CNAME记录 - 别名
    CNAME(String),
    /// NS记录 - 名称服务器
    NS(String),
    /// PTR记录 - 指针
    PTR(String),
    /// MX记录 - 邮件交换
    MX {
        /// 优先级，数值越小优先级越高
        priority: u16,
        /// 邮件服务器域名
        exchange: String,
    },
    /// TXT记录 - 文本
    TXT(Vec<String>),
    /// SOA记录 - 授权开始
    SOA {
        /// 主名称服务器
        mname: String,
        /// 管理员邮箱
        rname: String,
        /// 序列号
        serial: u32,
        /// 刷新间隔（秒）
        refresh: u32,
        /// 重试间隔（秒）
        retry: u32,
        /// 过期时间（秒）
        expire: u32,
        /// 最小TTL（秒）
        minimum: u32,
    },
    /// SRV记录 - 服务
    SRV {
        /// 优先级，数值越小优先级越高
        priority: u16,
        /// 权重，用于负载均衡
        weight: u16,
        /// 服务端口号
        port: u16,
        /// 目标主机名
        target: String,
    },
    /// 未知/不透明记录类型（含DNSSEC记录）
    Unknown(Vec<u8>),
}

/// DNS记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// A记录
    A,
    /// NS记录
    NS,
    /// CNAME记录
    CNAME,
    /// SOA记录
    SOA,
    /// PTR记录
    PTR,
    /// MX记录
    MX,
    /// TXT记录
    TXT,
    /// AAAA记录
    AAAA,
    /// SRV记录
    SRV,
    /// OPT伪记录（EDNS0）
    OPT,
    /// DS记录（DNSSEC）
    DS,
    /// RRSIG记录（DNSSEC）
    RRSIG,
    /// NSEC记录（DNSSEC）
    NSEC,
    /// DNSKEY记录（DNSSEC）
    DNSKEY,
    /// NSEC3记录（DNSSEC）
    NSEC3,
    /// TSIG伪记录（事务签名）
    TSIG,
    /// 未知类型
    Unknown(u16),
}

/// DNS查询类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QClass {
    /// Internet类别
    IN,
    /// Chaos类别
    CH,
    /// Hesiod类别
    HS,
    /// 任意类别
    ANY,
    /// 未知类别
    Unknown(u16),
}

/// DNS标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// 查询/响应标志
    pub qr: bool,
    /// 操作码
    pub opcode: u8,
    /// 权威回答
    pub aa: bool,
    /// 截断标志
    pub tc: bool,
    /// 期望递归
    pub rd: bool,
    /// 递归可用
    pub ra: bool,
    /// 保留位
    pub z: bool,
    /// 已验证数据（DNSSEC）
    pub ad: bool,
    /// 禁用检查（DNSSEC，客户端自行验证）
    pub cd: bool,
    /// 响应码
    pub rcode: u8,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            qr: false,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: false,
            z: false,
            ad: false,
            cd: false,
            rcode: 0,
        }
    }
}

/// DNS响应码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// 无错误
    NoError,
    /// 格式错误
    FormatError,
    /// 服务器失败
    ServerFailure,
    /// 域名不存在
    NxDomain,
    /// 未实现
    NotImplemented,
    /// 查询被拒绝
    Refused,
    /// 未知响应码
    Unknown(u8),
}

/// DNSSEC安全级别
///
/// 验证器的结论。引擎本身不判断某个级别算不算错误，
/// 由 `ResolverConfig::error_levels` 配置决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// 未经检查
    Unchecked,
    /// 不在签名链内
    Insecure,
    /// 验证通过
    Secure,
    /// 验证失败
    Bogus,
    /// 无法判定
    Indeterminate,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Unchecked => write!(f, "UNCHECKED"),
            SecurityLevel::Insecure => write!(f, "INSECURE"),
            SecurityLevel::Secure => write!(f, "SECURE"),
            SecurityLevel::Bogus => write!(f, "BOGUS"),
            SecurityLevel::Indeterminate => write!(f, "INDETERMINATE"),
        }
    }
}

/// EDNS0伪记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsRecord {
    /// UDP载荷大小
    pub udp_payload_size: u16,
    /// 扩展RCODE
    pub extended_rcode: u8,
    /// EDNS版本
    pub version: u8,
    /// DO位(DNSSEC OK)
    pub dnssec_ok: bool,
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            41 => RecordType::OPT,
            43 => RecordType::DS,
            46 => RecordType::RRSIG,
            47 => RecordType::NSEC,
            48 => RecordType::DNSKEY,
            50 => RecordType::NSEC3,
            250 => RecordType::TSIG,
            _ => RecordType::Unknown(value),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::OPT => 41,
            RecordType::DS => 43,
            RecordType::RRSIG => 46,
            RecordType::NSEC => 47,
            RecordType::DNSKEY => 48,
            RecordType::NSEC3 => 50,
            RecordType::TSIG => 250,
            RecordType::Unknown(value) => value,
        }
    }
}

impl From<u16> for QClass {
    fn from(value: u16) -> Self {
        match value {
            1 => QClass::IN,
            3 => QClass::CH,
            4 => QClass::HS,
            255 => QClass::ANY,
            _ => QClass::Unknown(value),
        }
    }
}

impl From<QClass> for u16 {
    fn from(qclass: QClass) -> Self {
        match qclass {
            QClass::IN => 1,
            QClass::CH => 3,
            QClass::HS => 4,
            QClass::ANY => 255,
            QClass::Unknown(value) => value,
        }
    }
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NxDomain,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            _ => ResponseCode::Unknown(value),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(rcode: ResponseCode) -> Self {
        match rcode {
            ResponseCode::NoError => 0,
            ResponseCode::FormatError => 1,
            ResponseCode::ServerFailure => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImplemented => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::OPT => write!(f, "OPT"),
            RecordType::DS => write!(f, "DS"),
            RecordType::RRSIG => write!(f, "RRSIG"),
            RecordType::NSEC => write!(f, "NSEC"),
            RecordType::DNSKEY => write!(f, "DNSKEY"),
            RecordType::NSEC3 => write!(f, "NSEC3"),
            RecordType::TSIG => write!(f, "TSIG"),
            RecordType::Unknown(value) => write!(f, "TYPE{}", value),
        }
    }
}

impl fmt::Display for QClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QClass::IN => write!(f, "IN"),
            QClass::CH => write!(f, "CH"),
            QClass::HS => write!(f, "HS"),
            QClass::ANY => write!(f, "ANY"),
            QClass::Unknown(value) => write!(f, "CLASS{}", value),
        }
    }
}
