//! 模板聚合:装载、工作表目录、部件读写、生成
//!
//! 一个 XlsxTemplate 持有解开的压缩包、工作簿树、共享字符串池和
//! 工作表目录。替换逻辑在 substitute 模块里。

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::archive::Archive;
use crate::drawing::{Drawing, basename, dirname, normalize_path};
use crate::errors::{Result, XlsxError};
use crate::shared_strings::SharedStringPool;
use crate::xmlelem::{Element, parse_document};

pub(crate) const DOCUMENT_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub(crate) const CALC_CHAIN_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";
pub(crate) const SHARED_STRINGS_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub(crate) const HYPERLINK_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";
pub(crate) const WORKSHEET_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub(crate) const DRAWING_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
pub(crate) const IMAGE_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

/// 模板选项
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// 预留:图片根路径
    pub image_root_path: Option<String>,
    /// 插入表格行时把下方的 twoCellAnchor 图片一起下移
    pub move_images: bool,
    /// 普通单元格里图片的缩放百分比,<= 0 时按 100 处理
    pub image_ratio: f64,
    /// 下移图片时把同一行锚定的图片也算进去
    pub move_same_line_images: bool,
}

/// 工作表目录项
#[derive(Debug, Clone)]
pub struct SheetInfo {
    pub id: u32,
    pub name: String,
    pub filename: String,
}

/// 装载后的工作表:目录项 + 解析好的部件树
#[derive(Debug)]
pub struct Sheet {
    pub id: u32,
    pub name: String,
    pub filename: String,
    pub root: Element,
}

/// 工作表的关系表部件
#[derive(Debug)]
pub struct SheetRels {
    pub filename: String,
    pub root: Element,
}

/// 一张命名表格(xl/tables/tableN.xml)
#[derive(Debug)]
pub struct NamedTable {
    pub filename: String,
    pub root: Element,
}

/// 按编号或名称定位工作表
#[derive(Debug, Clone, Copy)]
pub enum SheetIdentifier<'a> {
    Id(u32),
    Name(&'a str),
}

impl From<u32> for SheetIdentifier<'static> {
    fn from(id: u32) -> Self {
        SheetIdentifier::Id(id)
    }
}

impl<'a> From<&'a str> for SheetIdentifier<'a> {
    fn from(name: &'a str) -> Self {
        SheetIdentifier::Name(name)
    }
}

impl fmt::Display for SheetIdentifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetIdentifier::Id(id) => write!(f, "{id}"),
            SheetIdentifier::Name(name) => write!(f, "{name}"),
        }
    }
}

/// 一个在内存中被替换、再生成的 xlsx 模板
#[derive(Debug)]
pub struct XlsxTemplate {
    pub(crate) archive: Archive,
    pub(crate) shared_strings: SharedStringPool,
    pub(crate) workbook: Element,
    pub(crate) workbook_path: String,
    pub(crate) workbook_rels: Element,
    pub(crate) content_types: Element,
    pub(crate) prefix: String,
    pub(crate) shared_strings_path: String,
    pub(crate) calc_chain_path: Option<String>,
    pub(crate) sheets: Vec<SheetInfo>,
    pub(crate) option: Options,
}

impl XlsxTemplate {
    /// 从 xlsx 字节装载模板
    pub fn from_bytes(data: &[u8], option: Options) -> Result<Self> {
        let archive = Archive::open(data)?;

        // _rels/.rels 里的 officeDocument 关系指向工作簿
        let rels = parse_document(archive.expect_file("_rels/.rels")?)?;
        let workbook_path = rels
            .find_all("Relationship")
            .iter()
            .find(|rel| rel.attr("Type") == Some(DOCUMENT_RELATIONSHIP))
            .and_then(|rel| rel.attr("Target"))
            .ok_or_else(|| XlsxError::RelationshipNotFound(DOCUMENT_RELATIONSHIP.to_string()))?
            .to_string();
        let prefix = dirname(&workbook_path);

        let workbook = parse_document(archive.expect_file(&workbook_path)?)?;
        let workbook_rels_path = format!("{prefix}/_rels/{}.rels", basename(&workbook_path));
        let workbook_rels = parse_document(archive.expect_file(&workbook_rels_path)?)?;

        let sheets = load_sheets(&prefix, &workbook, &workbook_rels)?;

        let calc_chain_path = workbook_rels
            .find_all("Relationship")
            .iter()
            .find(|rel| rel.attr("Type") == Some(CALC_CHAIN_RELATIONSHIP))
            .and_then(|rel| rel.attr("Target"))
            .map(|target| format!("{prefix}/{target}"));

        let shared_strings_path = workbook_rels
            .find_all("Relationship")
            .iter()
            .find(|rel| rel.attr("Type") == Some(SHARED_STRINGS_RELATIONSHIP))
            .and_then(|rel| rel.attr("Target"))
            .map(|target| format!("{prefix}/{target}"))
            .ok_or_else(|| {
                XlsxError::RelationshipNotFound(SHARED_STRINGS_RELATIONSHIP.to_string())
            })?;
        let mut shared_strings = SharedStringPool::new();
        shared_strings.load_from(&parse_document(archive.expect_file(&shared_strings_path)?)?);

        let mut content_types = parse_document(archive.expect_file("[Content_Types].xml")?)?;
        ensure_jpg_default(&mut content_types);

        Ok(XlsxTemplate {
            archive,
            shared_strings,
            workbook,
            workbook_path,
            workbook_rels,
            content_types,
            prefix,
            shared_strings_path,
            calc_chain_path,
            sheets,
            option,
        })
    }

    /// 工作表目录
    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    /// 装载一张工作表,每次都重新解析部件。
    /// 解析顺序:编号匹配 → 名称匹配 → 1 起始的位置兜底
    pub fn load_sheet<'a>(&self, sheet: impl Into<SheetIdentifier<'a>>) -> Result<Sheet> {
        let ident = sheet.into();
        let mut info = self.sheets.iter().find(|s| match ident {
            SheetIdentifier::Id(id) => s.id == id,
            SheetIdentifier::Name(name) => s.name == name,
        });
        if info.is_none()
            && let SheetIdentifier::Id(id) = ident
            && id >= 1
        {
            info = self.sheets.get(id as usize - 1);
        }
        let info = info.ok_or_else(|| XlsxError::SheetNotFound(ident.to_string()))?;
        Ok(Sheet {
            id: info.id,
            name: info.name.clone(),
            filename: info.filename.clone(),
            root: parse_document(self.archive.expect_file(&info.filename)?)?,
        })
    }

    /// 工作表的关系表;部件不存在时在内存里合成一个空的。
    /// 返回值带上部件是否真实存在,决定最后要不要写回
    pub(crate) fn load_sheet_rels(&self, sheet_filename: &str) -> Result<(SheetRels, bool)> {
        let filename = format!(
            "{}/_rels/{}.rels",
            dirname(sheet_filename),
            basename(sheet_filename)
        );
        match self.archive.file(&filename) {
            Some(bytes) => Ok((
                SheetRels {
                    filename,
                    root: parse_document(bytes)?,
                },
                true,
            )),
            None => {
                let mut root = Element::new("Relationships");
                root.set_attr(
                    "xmlns",
                    "http://schemas.openxmlformats.org/package/2006/relationships",
                );
                Ok((SheetRels { filename, root }, false))
            }
        }
    }

    /// 装载工作表引用的全部命名表格
    pub(crate) fn load_tables(
        &self,
        sheet_root: &Element,
        sheet_filename: &str,
    ) -> Result<Vec<NamedTable>> {
        let rels_filename = format!(
            "{}/_rels/{}.rels",
            dirname(sheet_filename),
            basename(sheet_filename)
        );
        let Some(rels_bytes) = self.archive.file(&rels_filename) else {
            return Ok(Vec::new());
        };
        let rels = parse_document(rels_bytes)?;

        let mut tables = Vec::new();
        for table_part in sheet_root.find_all("tableParts/tablePart") {
            let relationship_id = table_part.attr("r:id").unwrap_or("");
            let target = rels
                .find_all("Relationship")
                .iter()
                .find(|rel| rel.attr("Id") == Some(relationship_id))
                .and_then(|rel| rel.attr("Target"))
                .ok_or_else(|| XlsxError::RelationshipNotFound(relationship_id.to_string()))?;
            let filename = normalize_path(&format!("{}/{target}", dirname(sheet_filename)));
            tables.push(NamedTable {
                root: parse_document(self.archive.expect_file(&filename)?)?,
                filename,
            });
        }
        Ok(tables)
    }

    pub(crate) fn write_tables(&mut self, tables: &[NamedTable]) -> Result<()> {
        for table in tables {
            self.archive
                .set(table.filename.clone(), table.root.to_document_bytes()?);
        }
        Ok(())
    }

    pub(crate) fn write_shared_strings(&mut self) -> Result<()> {
        let mut root = parse_document(self.archive.expect_file(&self.shared_strings_path)?)?;
        self.shared_strings.store_into(&mut root);
        self.archive
            .set(self.shared_strings_path.clone(), root.to_document_bytes()?);
        Ok(())
    }

    pub(crate) fn write_drawing(&mut self, drawing: &Drawing) -> Result<()> {
        self.archive
            .set(drawing.filename.clone(), drawing.root.to_document_bytes()?);
        self.archive.set(
            drawing.rel_filename.clone(),
            drawing.rel_root.to_document_bytes()?,
        );
        Ok(())
    }

    /// 把一张工作表复制成新名字的工作表
    pub fn copy_sheet<'a>(
        &mut self,
        sheet: impl Into<SheetIdentifier<'a>>,
        copy_name: &str,
    ) -> Result<()> {
        let source = self.load_sheet(sheet)?;
        let new_index = self.workbook.find_all("sheets/sheet").len() + 1;
        let filename = format!("worksheets/sheet{new_index}.xml");
        let arc_name = format!("{}/{filename}", self.prefix);
        self.archive.set(arc_name, source.root.to_document_bytes()?);

        let mut new_sheet = Element::new("sheet");
        new_sheet.set_attr(
            "name",
            if copy_name.is_empty() {
                format!("Sheet{new_index}")
            } else {
                copy_name.to_string()
            },
        );
        new_sheet.set_attr("sheetId", new_index.to_string());
        new_sheet.set_attr("r:id", format!("rId{new_index}"));
        if let Some(sheets) = self.workbook.find_mut("sheets") {
            sheets.push(new_sheet);
        }

        // 新关系先不给 Id,rebuild 时统一编号
        let mut new_rel = Element::new("Relationship");
        new_rel.set_attr("Type", WORKSHEET_RELATIONSHIP);
        new_rel.set_attr("Target", filename);
        self.workbook_rels.push(new_rel);

        self.rebuild()
    }

    /// 删除一张工作表:部件、目录项、关系和 content-type 都拿掉
    pub fn delete_sheet<'a>(&mut self, sheet: impl Into<SheetIdentifier<'a>>) -> Result<()> {
        let target = self.load_sheet(sheet)?;

        let mut rel_id = String::new();
        if let Some(sheets) = self.workbook.find_mut("sheets") {
            let sheet_id = target.id.to_string();
            if let Some(pos) = sheets
                .children
                .iter()
                .position(|s| s.attr("sheetId") == Some(sheet_id.as_str()))
            {
                rel_id = sheets.children[pos].attr("r:id").unwrap_or("").to_string();
                sheets.children.remove(pos);
            }
        }
        self.workbook_rels
            .retain_children(|rel| rel.attr("Id") != Some(rel_id.as_str()));

        self.archive.remove(&target.filename);
        let part_name = format!("/{}", target.filename);
        self.content_types
            .retain_children(|c| c.attr("PartName") != Some(part_name.as_str()));
        self.archive.set(
            "[Content_Types].xml".to_string(),
            self.content_types.to_document_bytes()?,
        );

        self.rebuild()
    }

    /// 复制/删除之后的局部重建:关系 Id 按类型优先级密集重编,
    /// sheet 的 r:id 和 sheetId 按位置重排,写回并重载目录
    pub(crate) fn rebuild(&mut self) -> Result<()> {
        // worksheet 最优先,其余已知类型按固定次序,未知类型排最后
        fn precedence(rel_type: &str) -> usize {
            let order = ["worksheet", "theme", "styles", "sharedStrings"];
            let base = basename(rel_type);
            order.iter().position(|t| *t == base).unwrap_or(order.len())
        }

        let mut ranked: Vec<(usize, usize, u32)> = self
            .workbook_rels
            .children
            .iter()
            .enumerate()
            .map(|(pos, rel)| {
                let prec = precedence(rel.attr("Type").unwrap_or(""));
                let id = rel
                    .attr("Id")
                    .and_then(|id| id.strip_prefix("rId"))
                    .and_then(|id| id.parse().ok())
                    .unwrap_or(u32::MAX);
                (pos, prec, id)
            })
            .collect();
        ranked.sort_by_key(|(pos, prec, id)| (*prec, *id, *pos));
        for (index, (pos, _, _)) in ranked.iter().enumerate() {
            self.workbook_rels.children[*pos].set_attr("Id", format!("rId{}", index + 1));
        }

        if let Some(sheets) = self.workbook.find_mut("sheets") {
            for (index, sheet) in sheets
                .children
                .iter_mut()
                .filter(|s| s.tag == "sheet")
                .enumerate()
            {
                sheet.set_attr("r:id", format!("rId{}", index + 1));
                sheet.set_attr("sheetId", (index + 1).to_string());
            }
        }

        let rels_path = format!(
            "{}/_rels/{}.rels",
            self.prefix,
            basename(&self.workbook_path)
        );
        self.archive
            .set(rels_path, self.workbook_rels.to_document_bytes()?);
        self.archive
            .set(self.workbook_path.clone(), self.workbook.to_document_bytes()?);
        self.sheets = load_sheets(&self.prefix, &self.workbook, &self.workbook_rels)?;
        Ok(())
    }

    /// 生成新的 xlsx 字节
    pub fn generate(&self) -> Result<Vec<u8>> {
        self.archive.to_zip_bytes()
    }

    /// 生成并编码成 base64 文本(给 WASM 宿主用的出口)
    pub fn generate_base64(&self) -> Result<String> {
        Ok(BASE64.encode(self.generate()?))
    }
}

/// 从工作簿和它的关系表取出工作表目录
fn load_sheets(prefix: &str, workbook: &Element, workbook_rels: &Element) -> Result<Vec<SheetInfo>> {
    let mut sheets = Vec::new();
    for sheet in workbook.find_all("sheets/sheet") {
        let sheet_id: u32 = sheet
            .attr("sheetId")
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);
        let rel_id = sheet.attr("r:id").unwrap_or("");
        let target = workbook_rels
            .find_all("Relationship")
            .iter()
            .find(|rel| rel.attr("Id") == Some(rel_id))
            .and_then(|rel| rel.attr("Target"))
            .ok_or_else(|| XlsxError::RelationshipNotFound(rel_id.to_string()))?;
        sheets.push(SheetInfo {
            id: sheet_id,
            name: sheet.attr("name").unwrap_or("").to_string(),
            filename: format!("{prefix}/{target}"),
        });
    }
    Ok(sheets)
}

/// 某些生成器不给 jpg 注册 Default 类型,图片写入前补上
fn ensure_jpg_default(content_types: &mut Element) {
    let has_jpg = content_types
        .find_all("Default")
        .iter()
        .any(|d| d.attr("Extension") == Some("jpg"));
    if !has_jpg {
        let mut default = Element::new("Default");
        default.set_attr("ContentType", "image/png");
        default.set_attr("Extension", "jpg");
        content_types.push(default);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_jpg_default() {
        let mut ct = Element::new("Types");
        ensure_jpg_default(&mut ct);
        assert_eq!(ct.children.len(), 1);
        assert_eq!(ct.children[0].attr("Extension"), Some("jpg"));
        // 已经有的话不重复补
        ensure_jpg_default(&mut ct);
        assert_eq!(ct.children.len(), 1);
    }

    #[test]
    fn test_sheet_identifier_display() {
        assert_eq!(SheetIdentifier::from(3u32).to_string(), "3");
        assert_eq!(SheetIdentifier::from("Plan").to_string(), "Plan");
    }
}
