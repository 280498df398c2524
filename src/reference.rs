//! 单元格引用代数
//!
//! Excel 的引用是纯文本("AB12"、"$C$5"、"Sheet one!A1"),这里提供
//! 列名与列号的互转、引用/区间的拆装以及行列递增。

use crate::errors::{Result, XlsxError};

/// 拆开后的单元格引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub table: Option<String>,
    pub col_absolute: bool,
    pub col: String,
    pub col_no: u32,
    pub row_absolute: bool,
    pub row: u32,
}

/// 拆开后的区间(start:end)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub start: CellRef,
    pub end: CellRef,
}

/// 列名转 1 起始的列号:A=1, Z=26, AA=27
pub fn char_to_num(col: &str) -> u32 {
    let mut num = 0u32;
    for ch in col.bytes() {
        num = num * 26 + (ch as u32 - 'A' as u32 + 1);
    }
    num
}

/// 列号转列名。这套 26 进制没有零位,余数 0 对应 'Z' 且商要退一
pub fn num_to_char(mut num: u32) -> String {
    let mut out = Vec::new();
    while num > 0 {
        let rem = num % 26;
        if rem == 0 {
            out.push(b'Z');
            num = num / 26 - 1;
        } else {
            out.push(b'A' + rem as u8 - 1);
            num /= 26;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// 是否是区间(带冒号)
pub fn is_range(reference: &str) -> bool {
    reference.contains(':')
}

/// 解析 `[Sheet!][$]col[$]row`。工作表限定符按最后一个 '!' 拆分
pub fn split_ref(reference: &str) -> Result<CellRef> {
    let (table, body) = match reference.rfind('!') {
        Some(pos) => (Some(reference[..pos].to_string()), &reference[pos + 1..]),
        None => (None, reference),
    };

    let mut rest = body;
    let col_absolute = rest.starts_with('$');
    if col_absolute {
        rest = &rest[1..];
    }
    let col_len = rest.bytes().take_while(|b| b.is_ascii_uppercase()).count();
    let col = &rest[..col_len];
    rest = &rest[col_len..];
    let row_absolute = rest.starts_with('$');
    if row_absolute {
        rest = &rest[1..];
    }
    let row_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    let row_digits = &rest[..row_len];
    rest = &rest[row_len..];

    if col.is_empty() || row_digits.is_empty() || !rest.is_empty() {
        return Err(XlsxError::InvalidReference(reference.to_string()));
    }
    let row: u32 = row_digits
        .parse()
        .map_err(|_| XlsxError::InvalidReference(reference.to_string()))?;

    Ok(CellRef {
        table,
        col_absolute,
        col: col.to_string(),
        col_no: char_to_num(col),
        row_absolute,
        row,
    })
}

/// split_ref 的逆操作
pub fn join_ref(r: &CellRef) -> String {
    let mut out = String::new();
    if let Some(table) = &r.table {
        out.push_str(table);
        out.push('!');
    }
    if r.col_absolute {
        out.push('$');
    }
    out.push_str(&r.col.to_uppercase());
    if r.row_absolute {
        out.push('$');
    }
    out.push_str(&r.row.to_string());
    out
}

/// 拆区间为两端引用文本
pub fn split_range(range: &str) -> Option<(String, String)> {
    let (start, end) = range.split_once(':')?;
    Some((start.to_string(), end.to_string()))
}

pub fn join_range(start: &str, end: &str) -> String {
    format!("{start}:{end}")
}

/// 只递增引用的列部分,其余原样保留(字母先转大写)
pub fn next_col(reference: &str) -> String {
    bump_component(reference, true)
}

/// 只递增引用的行部分,其余原样保留(字母先转大写)
pub fn next_row(reference: &str) -> String {
    bump_component(reference, false)
}

fn bump_component(reference: &str, col: bool) -> String {
    let (prefix, body) = match reference.rfind('!') {
        Some(pos) => (&reference[..=pos], &reference[pos + 1..]),
        None => ("", reference),
    };
    let body = body.to_uppercase();
    let mut out = String::from(prefix);
    let mut done = false;
    let mut iter = body.char_indices().peekable();
    while let Some((idx, ch)) = iter.next() {
        let hit = if col {
            ch.is_ascii_uppercase()
        } else {
            ch.is_ascii_digit()
        };
        if hit && !done {
            // 吃掉整段连续的字母(或数字)并递增
            let mut end = idx + 1;
            while let Some(&(j, c2)) = iter.peek() {
                let same = if col {
                    c2.is_ascii_uppercase()
                } else {
                    c2.is_ascii_digit()
                };
                if !same {
                    break;
                }
                end = j + 1;
                iter.next();
            }
            let run = &body[idx..end];
            if col {
                out.push_str(&num_to_char(char_to_num(run) + 1));
            } else {
                let n: u64 = run.parse().unwrap_or(0);
                out.push_str(&(n + 1).to_string());
            }
            done = true;
        } else {
            out.push(ch);
        }
    }
    out
}

/// 闭区间矩形包含测试
pub fn is_within(r: &CellRef, start: &CellRef, end: &CellRef) -> bool {
    start.row <= r.row && r.row <= end.row && start.col_no <= r.col_no && r.col_no <= end.col_no
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_to_num() {
        assert_eq!(char_to_num("A"), 1);
        assert_eq!(char_to_num("Z"), 26);
        assert_eq!(char_to_num("AA"), 27);
        assert_eq!(char_to_num("AZ"), 52);
        assert_eq!(char_to_num("BA"), 53);
        assert_eq!(char_to_num("AAA"), 703);
        assert_eq!(char_to_num("AAZ"), 728);
        assert_eq!(char_to_num("ADI"), 789);
    }

    #[test]
    fn test_num_to_char() {
        assert_eq!(num_to_char(1), "A");
        assert_eq!(num_to_char(26), "Z");
        assert_eq!(num_to_char(27), "AA");
        assert_eq!(num_to_char(52), "AZ");
        assert_eq!(num_to_char(53), "BA");
        assert_eq!(num_to_char(703), "AAA");
        assert_eq!(num_to_char(728), "AAZ");
        assert_eq!(num_to_char(789), "ADI");
    }

    #[test]
    fn test_roundtrip() {
        for n in 1..=20_000 {
            assert_eq!(char_to_num(&num_to_char(n)), n);
        }
    }

    #[test]
    fn test_split_ref() {
        let r = split_ref("AB12").unwrap();
        assert_eq!(r.table, None);
        assert_eq!(r.col, "AB");
        assert_eq!(r.col_no, 28);
        assert_eq!(r.row, 12);
        assert!(!r.col_absolute);
        assert!(!r.row_absolute);

        let r = split_ref("$C$5").unwrap();
        assert!(r.col_absolute);
        assert!(r.row_absolute);
        assert_eq!(r.col, "C");
        assert_eq!(r.row, 5);

        let r = split_ref("Table one!$AB$12").unwrap();
        assert_eq!(r.table.as_deref(), Some("Table one"));
        assert_eq!(r.col, "AB");
        assert_eq!(r.row, 12);
        assert!(r.col_absolute);
        assert!(r.row_absolute);

        assert!(split_ref("12").is_err());
        assert!(split_ref("AB").is_err());
        assert!(split_ref("").is_err());
    }

    #[test]
    fn test_join_ref() {
        let r = split_ref("Table one!$AB$12").unwrap();
        assert_eq!(join_ref(&r), "Table one!$AB$12");
        let r = split_ref("c5").map(|_| ()).err();
        assert!(r.is_some()); // 小写列名不被 split_ref 接受
        let r = CellRef {
            table: None,
            col_absolute: false,
            col: "ab".to_string(),
            col_no: 28,
            row_absolute: false,
            row: 12,
        };
        assert_eq!(join_ref(&r), "AB12");
    }

    #[test]
    fn test_next_col_row() {
        assert_eq!(next_col("A1"), "B1");
        assert_eq!(next_col("Z12"), "AA12");
        assert_eq!(next_col("ZZ12"), "AAA12");
        assert_eq!(next_col("a1"), "B1");
        assert_eq!(next_col("Sheet one!C5"), "Sheet one!D5");
        assert_eq!(next_row("A1"), "A2");
        assert_eq!(next_row("AB99"), "AB100");
        assert_eq!(next_row("a1"), "A2");
    }

    #[test]
    fn test_split_range() {
        let (start, end) = split_range("A1:C3").unwrap();
        assert_eq!(start, "A1");
        assert_eq!(end, "C3");
        assert!(split_range("A1").is_none());
        assert_eq!(join_range("A1", "C3"), "A1:C3");
        assert!(is_range("A1:C3"));
        assert!(!is_range("A1"));
    }

    #[test]
    fn test_is_within() {
        let start = split_ref("B2").unwrap();
        let end = split_ref("D4").unwrap();
        assert!(is_within(&split_ref("B2").unwrap(), &start, &end));
        assert!(is_within(&split_ref("C3").unwrap(), &start, &end));
        assert!(is_within(&split_ref("D4").unwrap(), &start, &end));
        assert!(!is_within(&split_ref("A2").unwrap(), &start, &end));
        assert!(!is_within(&split_ref("E3").unwrap(), &start, &end));
        assert!(!is_within(&split_ref("C5").unwrap(), &start, &end));
        assert!(!is_within(&split_ref("C1").unwrap(), &start, &end));
    }
}
