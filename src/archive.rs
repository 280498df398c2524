//! 模板压缩包的内存表示
//!
//! 整个 xlsx 读进来放在部件名 → 内容的映射里,所有修改都在内存中完成,
//! 最后再压回 zip。

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::errors::{Result, XlsxError};

#[derive(Debug, Default)]
pub struct Archive {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    pub fn new() -> Self {
        Archive::default()
    }

    /// 校验 zip 签名并解开全部部件(跳过目录项)
    pub fn open(zip_bytes: &[u8]) -> Result<Self> {
        validate_xlsx_format(zip_bytes)?;

        let cursor = Cursor::new(zip_bytes);
        let mut archive = ZipArchive::new(cursor)?;
        let mut parts = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let file_name = file.name().to_string();
            if file_name.ends_with('/') {
                continue;
            }
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            parts.insert(file_name, contents);
        }
        Ok(Archive { parts })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(Vec::as_slice)
    }

    /// 读取部件,不存在时报 MissingPart
    pub fn expect_file(&self, name: &str) -> Result<&[u8]> {
        self.file(name)
            .ok_or_else(|| XlsxError::MissingPart(name.to_string()))
    }

    pub fn set(&mut self, name: impl Into<String>, contents: Vec<u8>) {
        self.parts.insert(name.into(), contents);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.parts.remove(name)
    }

    /// 在形如 `{prefix}{N}{suffix}` 的部件名里找最大的 N,返回 N+1。
    /// 一个都没有时返回 1
    pub fn next_file_id(&self, prefix: &str, suffix: &str) -> u32 {
        let mut max_id = 0u32;
        for name in self.parts.keys() {
            if let Some(rest) = name.strip_prefix(prefix)
                && let Some(middle) = rest.strip_suffix(suffix)
                && let Ok(id) = middle.parse::<u32>()
            {
                max_id = max_id.max(id);
            }
        }
        max_id + 1
    }

    /// 压回 zip 字节(Deflated,压缩级别 6)
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        {
            let cursor = Cursor::new(&mut output);
            let mut zip_writer = ZipWriter::new(cursor);
            for (file_name, contents) in &self.parts {
                let options = SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated)
                    .compression_level(Some(6));
                zip_writer.start_file(file_name.as_str(), options)?;
                zip_writer.write_all(contents)?;
            }
            zip_writer.finish()?;
        }
        Ok(output)
    }
}

/// 检查 ZIP 文件签名:0x504B0304 / 0x504B0506(空包)/ 0x504B0708(分卷)
pub(crate) fn validate_xlsx_format(file_data: &[u8]) -> Result<()> {
    if file_data.len() < 22 {
        return Err(XlsxError::InvalidZipFormat);
    }
    let signature =
        u32::from_le_bytes([file_data[0], file_data[1], file_data[2], file_data[3]]);
    match signature {
        0x04034b50 | 0x06054b50 | 0x08074b50 => Ok(()),
        _ => Err(XlsxError::InvalidZipFormat),
    }
}
