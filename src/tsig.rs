//! TSIG事务签名
//!
//! 对发出的查询附加HMAC签名（RFC 8945）。签名覆盖整个报文加上
//! TSIG变量区；生成的TSIG记录作为最后一条附加记录发送。
//! 响应MAC校验由上层验证流程处理，不在此模块范围内。

use crate::types::{QClass, Record, RecordData, RecordType};
use crate::wire;
use crate::{DnsError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// TSIG签名算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TsigAlgorithm {
    /// HMAC-SHA256
    HmacSha256,
}

impl TsigAlgorithm {
    /// 算法在TSIG记录中的域名表示
    pub fn name(&self) -> &'static str {
        match self {
            TsigAlgorithm::HmacSha256 => "hmac-sha256",
        }
    }
}

/// TSIG密钥
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsigKey {
    /// 密钥名称（作为TSIG记录的所有者名称发送）
    pub name: String,
    /// 签名算法
    pub algorithm: TsigAlgorithm,
    /// 密钥原始字节
    pub secret: Vec<u8>,
}

impl TsigKey {
    /// 创建HMAC-SHA256密钥
    pub fn new(name: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            algorithm: TsigAlgorithm::HmacSha256,
            secret: secret.into(),
        }
    }
}

impl From<(&str, &[u8])> for TsigKey {
    fn from((name, secret): (&str, &[u8])) -> Self {
        TsigKey::new(name, secret)
    }
}

/// 签名的时间误差容忍（秒）
const FUDGE: u16 = 300;

/// 对已编码的查询报文生成TSIG记录
///
/// `message_bytes` 是不含TSIG记录的完整报文；`time_signed` 为Unix秒，
/// 由调用方传入以便测试。
pub fn sign(
    message_bytes: &[u8],
    key: &TsigKey,
    original_id: u16,
    time_signed: u64,
) -> Result<Record> {
    // MAC输入 = 报文字节 + TSIG变量区
    let mut input = message_bytes.to_vec();
    append_tsig_variables(&mut input, key, time_signed)?;

    let mut mac = HmacSha256::new_from_slice(&key.secret)
        .map_err(|e| DnsError::Config(format!("Invalid TSIG key: {}", e)))?;
    mac.update(&input);
    let digest = mac.finalize().into_bytes();

    // RDATA: 算法名 + 时间(48位) + fudge + MAC + 原始ID + 错误 + 其他数据
    let mut rdata = Vec::with_capacity(64 + digest.len());
    wire::encode_name(key.algorithm.name(), &mut rdata)?;
    rdata.extend_from_slice(&time_signed.to_be_bytes()[2..]);
    rdata.extend_from_slice(&FUDGE.to_be_bytes());
    rdata.extend_from_slice(&(digest.len() as u16).to_be_bytes());
    rdata.extend_from_slice(&digest);
    rdata.extend_from_slice(&original_id.to_be_bytes());
    rdata.extend_from_slice(&0u16.to_be_bytes());
    rdata.extend_from_slice(&0u16.to_be_bytes());

    Ok(Record {
        name: key.name.clone(),
        rtype: RecordType::TSIG,
        class: QClass::ANY,
        ttl: 0,
        data: RecordData::Unknown(rdata),
    })
}

/// TSIG变量区：密钥名 + CLASS + TTL + 算法名 + 时间 + fudge + 错误 + 其他
fn append_tsig_variables(buffer: &mut Vec<u8>, key: &TsigKey, time_signed: u64) -> Result<()> {
    wire::encode_name(&key.name, buffer)?;
    buffer.extend_from_slice(&u16::from(QClass::ANY).to_be_bytes());
    buffer.extend_from_slice(&0u32.to_be_bytes());
    wire::encode_name(key.algorithm.name(), buffer)?;
    buffer.extend_from_slice(&time_signed.to_be_bytes()[2..]);
    buffer.extend_from_slice(&FUDGE.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        let key = TsigKey::new("test-key", b"secret".to_vec());
        let bytes = vec![0u8; 12];

        let a = sign(&bytes, &key, 0x1234, 1_700_000_000).unwrap();
        let b = sign(&bytes, &key, 0x1234, 1_700_000_000).unwrap();
        assert_eq!(a, b);

        let c = sign(&bytes, &key, 0x1234, 1_700_000_001).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_tsig_record_shape() {
        let key = TsigKey::new("test-key", b"secret".to_vec());
        let record = sign(&[0u8; 12], &key, 1, 1_700_000_000).unwrap();

        assert_eq!(record.rtype, RecordType::TSIG);
        assert_eq!(record.class, QClass::ANY);
        assert_eq!(record.ttl, 0);
        assert_eq!(record.name, "test-key");
        if let RecordData::Unknown(rdata) = &record.data {
            // 算法名 "hmac-sha256" 编码后12+1字节，随后是时间与MAC
            assert!(rdata.len() > 13 + 6 + 2 + 32);
        } else {
            panic!("Expected opaque TSIG rdata");
        }
    }
}
