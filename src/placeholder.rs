//! `${...}` 占位符解析
//!
//! 记号形式:`${[type:]name[.key][:subtype]}`。type 缺省为 normal;
//! name 后第一个 '.' 之后的部分整体作为 key;subtype 取第二个 ':'
//! 之后的全部内容(用于 `image` 列,如 `${table:rows.photo:image}`)。

/// 一次占位符出现
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// "normal" / "table" / "image",其他拼写按 normal 处理
    pub ptype: String,
    pub name: String,
    pub key: Option<String>,
    pub sub_type: Option<String>,
    /// 记号是否占满整个字符串
    pub full: bool,
    /// 原文,用于整串中的字面替换
    pub placeholder: String,
}

impl Placeholder {
    pub fn is_table(&self) -> bool {
        self.ptype == "table"
    }

    pub fn is_image(&self) -> bool {
        self.ptype == "image" || self.sub_type.as_deref() == Some("image")
    }

    pub fn is_normal(&self) -> bool {
        !self.is_table() && self.ptype != "image"
    }
}

/// 从左到右提取字符串中的全部占位符
pub fn extract_placeholders(input: &str) -> Vec<Placeholder> {
    let mut out = Vec::new();
    let mut rest = input;
    let mut offset = 0usize;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let inner = &after[..end];
        let token = &rest[start..start + 2 + end + 1];
        if let Some(mut ph) = parse_inner(inner) {
            ph.placeholder = token.to_string();
            ph.full = offset == 0 && start == 0 && token.len() == input.len();
            out.push(ph);
        }
        offset += start + token.len();
        rest = &rest[start + token.len()..];
    }
    out
}

fn parse_inner(inner: &str) -> Option<Placeholder> {
    if inner.is_empty() {
        return None;
    }
    // 第一个 ':' 前是 type,第二个 ':' 后整体是 subtype
    let parts: Vec<&str> = inner.split(':').collect();
    let (ptype, body, sub_type) = match parts.len() {
        1 => ("normal", parts[0], None),
        2 => (parts[0], parts[1], None),
        _ => (parts[0], parts[1], Some(parts[2..].join(":"))),
    };
    if body.is_empty() || ptype.is_empty() {
        return None;
    }
    let (name, key) = match body.split_once('.') {
        Some((name, key)) if !name.is_empty() && !key.is_empty() => {
            (name.to_string(), Some(key.to_string()))
        }
        _ => (body.to_string(), None),
    };
    Some(Placeholder {
        ptype: ptype.to_string(),
        name,
        key,
        sub_type,
        full: false,
        placeholder: String::new(),
    })
}
