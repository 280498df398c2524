//! 轻量级 XML 元素树
//!
//! 工作表、工作簿、关系表等部件需要结构性修改(插入行、克隆单元格、
//! 调整区间),逐事件流式改写难以表达,所以先解析成元素树,改完再序列化。

use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::errors::{Result, XlsxError};

/// 一个 XML 元素:标签名(含前缀)、有序属性、文本、子元素
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Element {
            tag: tag.to_string(),
            ..Element::default()
        }
    }

    /// 带属性构造,属性按传入顺序保留
    pub fn with_attrs(tag: &str, attrs: &[(&str, &str)]) -> Self {
        Element {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Element::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 设置属性,已存在则覆盖,否则追加到末尾
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(pair) => pair.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(pos).1)
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn insert(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    pub fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
    }

    /// 沿 `a/b/c` 路径找第一个匹配的后代
    pub fn find(&self, path: &str) -> Option<&Element> {
        let mut cur = self;
        for seg in path.split('/') {
            cur = cur.children.iter().find(|c| c.tag == seg)?;
        }
        Some(cur)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Element> {
        let mut cur = self;
        for seg in path.split('/') {
            cur = cur.children.iter_mut().find(|c| c.tag == seg)?;
        }
        Some(cur)
    }

    /// 沿路径收集所有匹配的后代
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut level: Vec<&Element> = vec![self];
        for seg in path.split('/') {
            let mut next = Vec::new();
            for el in level {
                next.extend(el.children.iter().filter(|c| c.tag == seg));
            }
            level = next;
        }
        level
    }

    /// 对路径下的每个匹配元素执行可变操作
    pub fn for_each_mut(&mut self, path: &str, mut f: impl FnMut(&mut Element)) {
        fn walk(el: &mut Element, segs: &[&str], f: &mut impl FnMut(&mut Element)) {
            let Some((head, rest)) = segs.split_first() else {
                f(el);
                return;
            };
            for c in el.children.iter_mut().filter(|c| c.tag == *head) {
                walk(c, rest, f);
            }
        }
        let segs: Vec<&str> = path.split('/').collect();
        walk(self, &segs, &mut f);
    }

    pub fn retain_children(&mut self, f: impl FnMut(&Element) -> bool) {
        let mut f = f;
        self.children.retain(|c| f(c));
    }

    /// 浅克隆:只复制标签和属性
    pub fn clone_shallow(&self) -> Element {
        Element {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            text: None,
            children: Vec::new(),
        }
    }

    /// 序列化为完整文档(带 XML 声明)
    pub fn to_document_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        write_element(&mut writer, self)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &Element) -> Result<()> {
    let mut start = BytesStart::new(el.tag.as_str());
    for (k, v) in &el.attrs {
        let escaped = escape(v.as_str());
        start.push_attribute((k.as_bytes(), escaped.as_bytes()));
    }
    if el.children.is_empty() && el.text.is_none() {
        writer.write_event(Event::Empty(start))?;
    } else {
        writer.write_event(Event::Start(start))?;
        if let Some(text) = &el.text {
            writer.write_event(Event::Text(BytesText::from_escaped(escape(text.as_str()))))?;
        }
        for child in &el.children {
            write_element(writer, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new(el.tag.as_str())))?;
    }
    Ok(())
}

/// 解析一个 XML 部件为元素树
pub fn parse_document(bytes: &[u8]) -> Result<Element> {
    let content = std::str::from_utf8(bytes).map_err(|e| XlsxError::Xml(e.to_string()))?;
    let mut reader = Reader::from_str(content);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from_start(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let el = element_from_start(e)?;
                attach(&mut stack, &mut root, el);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = std::str::from_utf8(e.as_ref())
                        .map_err(|err| XlsxError::Xml(err.to_string()))?;
                    let text =
                        unescape(raw).map_err(|err| XlsxError::Xml(err.to_string()))?;
                    top.text.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = std::str::from_utf8(e.as_ref())
                        .map_err(|err| XlsxError::Xml(err.to_string()))?;
                    top.text.get_or_insert_with(String::new).push_str(raw);
                }
            }
            Ok(Event::End(_)) => {
                if let Some(mut el) = stack.pop() {
                    // 子元素之间的排版空白不算文本
                    if !el.children.is_empty()
                        && el.text.as_deref().is_some_and(|t| t.trim().is_empty())
                    {
                        el.text = None;
                    }
                    attach(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
        }
        buf.clear();
    }

    root.ok_or_else(|| XlsxError::Xml("空的 XML 文档".to_string()))
}

fn element_from_start(e: &BytesStart<'_>) -> Result<Element> {
    let tag = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| XlsxError::Xml(err.to_string()))?
        .to_string();
    let mut el = Element::new(&tag);
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| XlsxError::Xml(err.to_string()))?;
        let raw = std::str::from_utf8(&attr.value)
            .map_err(|err| XlsxError::Xml(err.to_string()))?;
        let value = unescape(raw).map_err(|err| XlsxError::Xml(err.to_string()))?;
        el.attrs.push((key.to_string(), value.into_owned()));
    }
    Ok(el)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_find() {
        let xml = br#"<?xml version="1.0"?>
<workbook xmlns="http://example.com">
  <sheets>
    <sheet name="Sheet1" sheetId="1" r:id="rId1"/>
    <sheet name="Sheet2" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;
        let root = parse_document(xml).unwrap();
        assert_eq!(root.tag, "workbook");
        let sheets = root.find_all("sheets/sheet");
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].attr("name"), Some("Sheet1"));
        assert_eq!(sheets[1].attr("r:id"), Some("rId2"));
        assert!(root.find("sheets/missing").is_none());
    }

    #[test]
    fn test_text_and_whitespace() {
        let root = parse_document(
            br#"<si>
  <t>hello &amp; world</t>
</si>"#,
        )
        .unwrap();
        // si 内部的排版空白被丢弃,t 的文本保留并已反转义
        assert_eq!(root.text, None);
        assert_eq!(root.find("t").unwrap().text(), "hello & world");

        let spaced = parse_document(br#"<t> </t>"#).unwrap();
        assert_eq!(spaced.text(), " ");
    }

    #[test]
    fn test_roundtrip_with_escaping() {
        let mut cell = Element::with_attrs("c", &[("r", "A1"), ("t", "s")]);
        let mut v = Element::new("v");
        v.set_text("3 < 5 & \"quoted\"");
        cell.push(v);
        let bytes = cell.to_document_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"));
        assert!(text.contains("&lt;"));
        assert!(text.contains("&amp;"));

        let reparsed = parse_document(text.as_bytes()).unwrap();
        assert_eq!(reparsed.find("v").unwrap().text(), "3 < 5 & \"quoted\"");
        assert_eq!(reparsed.attr("r"), Some("A1"));
    }

    #[test]
    fn test_mutation_helpers() {
        let mut root = parse_document(b"<row r=\"2\"><c r=\"A2\"/><c r=\"B2\"/></row>").unwrap();
        root.set_attr("r", "3");
        root.for_each_mut("c", |c| {
            let r = c.attr("r").unwrap().replace('2', "3");
            c.set_attr("r", r);
        });
        assert_eq!(root.attr("r"), Some("3"));
        assert_eq!(root.children[1].attr("r"), Some("B3"));

        let taken = root.take_children();
        assert_eq!(taken.len(), 2);
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_empty_element_serialization() {
        let el = Element::with_attrs("calcChain", &[("count", "0")]);
        let text = String::from_utf8(el.to_document_bytes().unwrap()).unwrap();
        assert!(text.ends_with("<calcChain count=\"0\"/>"));
    }
}
