//! DNSSEC验证器接口
//!
//! 验证器是引擎的外部协作者：拿到一个响应报文，给出安全级别或
//! 验证错误。引擎把结论包装成VALIDATED事件送回事件总线，由
//! 配置（`ResolverConfig::error_levels`）决定哪些级别按错误上报。

use crate::types::{Message, SecurityLevel};
use crate::Result;
use async_trait::async_trait;

/// DNSSEC验证器
#[async_trait]
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// 验证一个响应报文
    ///
    /// 成功时返回（可能被改写的）报文与安全级别；失败返回
    /// 验证错误，该错误会原样终结对应的客户端查询。
    async fn validate(&self, message: Message) -> Result<(Message, SecurityLevel)>;
}

/// 直通验证器
///
/// 未接入真实验证器时的默认实现：不做任何检查，级别保持
/// `Unchecked`。
#[derive(Debug, Default)]
pub struct NullValidator;

#[async_trait]
impl Validator for NullValidator {
    async fn validate(&self, message: Message) -> Result<(Message, SecurityLevel)> {
        Ok((message, SecurityLevel::Unchecked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QClass, RecordType};

    #[tokio::test]
    async fn test_null_validator_passes_through() {
        let message = Message::new_query("example.com", RecordType::A, QClass::IN);
        let (out, level) = NullValidator.validate(message.clone()).await.unwrap();
        assert_eq!(out, message);
        assert_eq!(level, SecurityLevel::Unchecked);
    }
}
