//! 共享字符串池
//!
//! sharedStrings.xml 的内存表示:有序字符串表加反向索引。
//! 替换过程中所有字符串型单元格的值都经过这里。

use std::collections::HashMap;

use crate::xmlelem::Element;

#[derive(Debug, Default)]
pub struct SharedStringPool {
    strings: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl SharedStringPool {
    pub fn new() -> Self {
        SharedStringPool::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    /// 已存在返回原下标,否则追加
    pub fn string_index(&mut self, s: &str) -> usize {
        if let Some(&idx) = self.lookup.get(s) {
            return idx;
        }
        self.add_shared_string(s)
    }

    /// 无条件追加,返回新下标
    pub fn add_shared_string(&mut self, s: &str) -> usize {
        let idx = self.strings.len();
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), idx);
        idx
    }

    /// 原地替换,保持下标不变;旧串不存在时退化为追加
    pub fn replace_string(&mut self, old: &str, new: &str) -> usize {
        match self.lookup.remove(old) {
            Some(idx) => {
                self.strings[idx] = new.to_string();
                self.lookup.insert(new.to_string(), idx);
                idx
            }
            None => self.add_shared_string(new),
        }
    }

    /// 从 sharedStrings 部件的元素树装入。
    /// 每个 si 取其下全部 t 的文本拼接(含富文本 run 里的 r/t)
    pub fn load_from(&mut self, root: &Element) {
        self.strings.clear();
        self.lookup.clear();
        for si in root.find_all("si") {
            let mut text = String::new();
            for t in si.find_all("t") {
                text.push_str(t.text());
            }
            for t in si.find_all("r/t") {
                text.push_str(t.text());
            }
            let idx = self.strings.len();
            self.strings.push(text.clone());
            // 重复串保留首个下标
            self.lookup.entry(text).or_insert(idx);
        }
    }

    /// 写回部件根:清掉原有 si,每个槽位一个 si/t,
    /// count 与 uniqueCount 都等于表长
    pub fn store_into(&self, root: &mut Element) {
        root.children.clear();
        for s in &self.strings {
            let mut si = Element::new("si");
            let mut t = Element::new("t");
            t.set_text(s.clone());
            si.push(t);
            root.push(si);
        }
        let count = self.strings.len().to_string();
        root.set_attr("count", count.clone());
        root.set_attr("uniqueCount", count);
    }
}
