use std::fmt;

#[doc = "稳定的错误码标识，随诊断信息一起输出。"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[doc = "SYSQ-BIND-001: 无法定位原生库或导出符号。"]
    Bind001,
    #[doc = "SYSQ-BIND-002: 同一入口点以不兼容的签名重复解析。"]
    Bind002,
    #[doc = "SYSQ-NATIVE-101: 原生调用返回了非预期的状态码。"]
    Native101,
    #[doc = "SYSQ-NATIVE-102: 打开句柄失败（通常是权限不足或目标不可达）。"]
    Native102,
    #[doc = "SYSQ-DECODE-201: 缓冲区内容与声明的长度或计数不一致。"]
    Decode201,
    #[doc = "SYSQ-PLATFORM-301: 当前平台不提供该原生接口。"]
    Platform301,
    #[doc = "SYSQ-ARG-401: 参数无效。"]
    Arg401,
    #[doc = "SYSQ-CONFIG-501: 配置加载或校验失败。"]
    Config501,
}

impl ErrorCode {
    #[doc = "返回规范化错误码字符串。"]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Bind001 => "SYSQ-BIND-001",
            ErrorCode::Bind002 => "SYSQ-BIND-002",
            ErrorCode::Native101 => "SYSQ-NATIVE-101",
            ErrorCode::Native102 => "SYSQ-NATIVE-102",
            ErrorCode::Decode201 => "SYSQ-DECODE-201",
            ErrorCode::Platform301 => "SYSQ-PLATFORM-301",
            ErrorCode::Arg401 => "SYSQ-ARG-401",
            ErrorCode::Config501 => "SYSQ-CONFIG-501",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[doc = "绑定注册表的错误，可克隆以便按入口点族缓存。"]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[doc = "原生库或符号不存在。"]
    #[error("无法解析入口点 {library}!{symbol}: {reason}")]
    UnresolvedSymbol {
        library: String,
        symbol: String,
        reason: String,
    },

    #[doc = "已解析的入口点以不同签名再次请求。"]
    #[error("入口点 {library}!{symbol} 的签名不一致")]
    SignatureMismatch { library: String, symbol: String },
}

impl BindingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BindingError::UnresolvedSymbol { .. } => ErrorCode::Bind001,
            BindingError::SignatureMismatch { .. } => ErrorCode::Bind002,
        }
    }
}

#[doc = "查询过程的统一错误类型。"]
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[doc = "绑定失败。"]
    #[error("绑定错误: {0}")]
    Binding(#[from] BindingError),

    #[doc = "原生调用失败，保留原始状态码。"]
    #[error("原生调用 {call} 失败，状态码 {code}")]
    Failure { call: &'static str, code: u32 },

    #[doc = "记录解码失败。"]
    #[error("记录 {record} 格式错误: {message}")]
    MalformedRecord {
        record: &'static str,
        message: String,
    },

    #[doc = "打开句柄失败。"]
    #[error("{call} 无法为 {target} 打开句柄，状态码 {code}")]
    HandleUnavailable {
        call: &'static str,
        target: String,
        code: u32,
    },

    #[doc = "平台不支持。"]
    #[error("平台不支持: {message}")]
    Unsupported { message: String },

    #[doc = "参数无效。"]
    #[error("参数无效: {message}")]
    InvalidArgument { message: String },

    #[doc = "配置错误。"]
    #[error("配置错误: {message}")]
    ConfigError { message: String },

    #[doc = "IO 错误。"]
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl QueryError {
    pub fn malformed(record: &'static str, message: impl Into<String>) -> Self {
        QueryError::MalformedRecord {
            record,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::Binding(err) => err.code(),
            QueryError::Failure { .. } => ErrorCode::Native101,
            QueryError::HandleUnavailable { .. } => ErrorCode::Native102,
            QueryError::MalformedRecord { .. } => ErrorCode::Decode201,
            QueryError::Unsupported { .. } => ErrorCode::Platform301,
            QueryError::InvalidArgument { .. } => ErrorCode::Arg401,
            QueryError::ConfigError { .. } | QueryError::IoError(_) => ErrorCode::Config501,
        }
    }

    pub fn native_code(&self) -> Option<u32> {
        match self {
            QueryError::Failure { code, .. } | QueryError::HandleUnavailable { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BindingError, ErrorCode, QueryError};

    #[test]
    fn native_code_is_preserved_for_failures() {
        let err = QueryError::Failure {
            call: "EnumServicesStatusExW",
            code: 5,
        };
        assert_eq!(err.native_code(), Some(5));
        assert_eq!(err.code(), ErrorCode::Native101);

        let err = QueryError::HandleUnavailable {
            call: "OpenSCManagerW",
            target: "srv01".to_string(),
            code: 1722,
        };
        assert_eq!(err.native_code(), Some(1722));
        assert_eq!(err.code().as_str(), "SYSQ-NATIVE-102");
    }

    #[test]
    fn binding_errors_keep_their_code_through_conversion() {
        let err: QueryError = BindingError::SignatureMismatch {
            library: "advapi32.dll".to_string(),
            symbol: "OpenServiceW".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::Bind002);
        assert_eq!(err.native_code(), None);
    }
}
