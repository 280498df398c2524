//! 错误类型定义

use thiserror::Error;

/// XLSX 处理错误类型
#[derive(Error, Debug)]
pub enum XlsxError {
    #[error("Invalid Zip Format")]
    InvalidZipFormat,
    #[error("Sheet {0} not found")]
    SheetNotFound(String),
    #[error("missing part: {0}")]
    MissingPart(String),
    #[error("relationship not found: {0}")]
    RelationshipNotFound(String),
    #[error("invalid cell reference: {0}")]
    InvalidReference(String),
    #[error("invalid relationship id: {0}")]
    InvalidRelationshipId(String),
    #[error("XML 解析错误: {0}")]
    Xml(String),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<quick_xml::Error> for XlsxError {
    fn from(e: quick_xml::Error) -> Self {
        XlsxError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XlsxError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        XlsxError::Xml(e.to_string())
    }
}

/// 本库统一的 Result 类型
pub type Result<T> = std::result::Result<T, XlsxError>;
