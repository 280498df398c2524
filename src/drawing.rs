//! 绘图部件与图片放置
//!
//! 图片占位符最终落成 drawing 部件里的 oneCellAnchor 锚点 + media 图片。
//! 行插入后已有的 twoCellAnchor 图片要整体下移。

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::archive::Archive;
use crate::errors::{Result, XlsxError};
use crate::imagesize::get_image_dimensions;
use crate::reference::{char_to_num, split_range, split_ref};
use crate::template::{DRAWING_RELATIONSHIP, IMAGE_RELATIONSHIP, Options, SheetRels};
use crate::value::Value;
use crate::xmlelem::Element;

/// 一个工作表的 drawing 部件及其关系表
#[derive(Debug)]
pub struct Drawing {
    pub filename: String,
    pub rel_filename: String,
    pub root: Element,
    pub rel_root: Element,
}

/// 合并单元格几何换算要用的工作表快照:
/// 行高列宽在替换过程中不变,开始前一次性收集
#[derive(Debug, Default)]
pub struct SheetDims {
    default_col_width: f64,
    default_row_height: f64,
    cols: Vec<(u32, u32, Option<f64>)>,
    row_heights: Vec<(u32, f64)>,
}

impl SheetDims {
    pub fn collect(sheet_root: &Element) -> Self {
        let format = sheet_root.find("sheetFormatPr");
        let default_col_width = format
            .and_then(|f| f.attr("defaultColWidth"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(11.42578125);
        let default_row_height = format
            .and_then(|f| f.attr("defaultRowHeight"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(15.0);
        let cols = sheet_root
            .find_all("cols/col")
            .iter()
            .filter_map(|col| {
                let min = col.attr("min")?.parse().ok()?;
                let max = col.attr("max")?.parse().ok()?;
                let width = col.attr("width").and_then(|w| w.parse().ok());
                Some((min, max, width))
            })
            .collect();
        let row_heights = sheet_root
            .find_all("sheetData/row")
            .iter()
            .filter_map(|row| {
                let r = row.attr("r")?.parse().ok()?;
                let ht = row.attr("ht")?.parse().ok()?;
                Some((r, ht))
            })
            .collect();
        SheetDims {
            default_col_width,
            default_row_height,
            cols,
            row_heights,
        }
    }

    /// 一列的字符宽度,cols 区间命中时覆盖默认值
    fn col_width(&self, num_col: u32) -> f64 {
        let mut width = self.default_col_width;
        for (min, max, w) in &self.cols {
            if num_col >= *min && num_col <= *max
                && let Some(w) = w
            {
                width = *w;
            }
        }
        width
    }

    /// 一行的点数高度
    fn row_height(&self, num_row: u32) -> f64 {
        self.row_heights
            .iter()
            .find(|(r, _)| *r == num_row)
            .map(|(_, ht)| *ht)
            .unwrap_or(self.default_row_height)
    }
}

pub fn pixels_to_emus(pixels: f64) -> i64 {
    (pixels * 914400.0 / 96.0).round() as i64
}

pub fn column_width_to_emus(width: f64) -> i64 {
    // 字符宽度到像素的近似换算系数
    pixels_to_emus(width * 7.625579987895905)
}

pub fn row_height_to_emus(height: f64) -> i64 {
    (height / 72.0 * 914400.0).round() as i64
}

/// 在 `tag` 子元素的 `attr` 属性里找形如 `{prefix}{N}` 的最大 N,返回 N+1。
/// 属性不带数字编号时报错
pub fn find_max_id(element: &Element, tag: &str, attr: &str, prefix: &str) -> Result<u32> {
    let mut max_id = 0u32;
    for elem in element.find_all(tag) {
        let value = elem.attr(attr).unwrap_or("");
        let id: u32 = value
            .strip_prefix(prefix)
            .and_then(|rest| rest.parse().ok())
            .ok_or_else(|| XlsxError::InvalidRelationshipId(value.to_string()))?;
        max_id = max_id.max(id);
    }
    Ok(max_id + 1)
}

/// 取工作表的 drawing 部件;没有就现场造一个
pub fn load_drawing(
    archive: &Archive,
    content_types: &mut Element,
    sheet_root: &mut Element,
    sheet_filename: &str,
    rels: &mut SheetRels,
) -> Result<Drawing> {
    let Some(drawing_part) = sheet_root.find("drawing") else {
        return init_drawing(archive, content_types, sheet_root, rels);
    };
    let relationship_id = drawing_part.attr("r:id").unwrap_or("").to_string();
    let target = rels
        .root
        .find_all("Relationship")
        .iter()
        .find(|rel| rel.attr("Id") == Some(relationship_id.as_str()))
        .and_then(|rel| rel.attr("Target"))
        .ok_or_else(|| XlsxError::RelationshipNotFound(relationship_id.clone()))?
        .to_string();

    let sheet_directory = dirname(sheet_filename);
    let filename = normalize_path(&format!("{sheet_directory}/{target}"));
    let root = crate::xmlelem::parse_document(archive.expect_file(&filename)?)?;
    let rel_filename = format!("{}/_rels/{}.rels", dirname(&filename), basename(&filename));
    let rel_root = crate::xmlelem::parse_document(archive.expect_file(&rel_filename)?)?;
    Ok(Drawing {
        filename,
        rel_filename,
        root,
        rel_root,
    })
}

fn init_drawing(
    archive: &Archive,
    content_types: &mut Element,
    sheet_root: &mut Element,
    rels: &mut SheetRels,
) -> Result<Drawing> {
    let max_id = find_max_id(&rels.root, "Relationship", "Id", "rId")?;
    let file_id = archive.next_file_id("xl/drawings/drawing", ".xml");
    let drawing_name = format!("drawing{file_id}.xml");

    let rid = format!("rId{max_id}");
    let mut rel = Element::new("Relationship");
    rel.set_attr("Id", rid.clone());
    rel.set_attr("Type", DRAWING_RELATIONSHIP);
    rel.set_attr("Target", format!("../drawings/{drawing_name}"));
    rels.root.push(rel);

    let mut drawing_el = Element::new("drawing");
    drawing_el.set_attr("r:id", rid);
    sheet_root.push(drawing_el);

    let mut root = Element::new("xdr:wsDr");
    root.set_attr(
        "xmlns:xdr",
        "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing",
    );
    root.set_attr(
        "xmlns:a",
        "http://schemas.openxmlformats.org/drawingml/2006/main",
    );
    let mut rel_root = Element::new("Relationships");
    rel_root.set_attr(
        "xmlns",
        "http://schemas.openxmlformats.org/package/2006/relationships",
    );

    let filename = format!("xl/drawings/{drawing_name}");
    let mut override_el = Element::new("Override");
    override_el.set_attr(
        "ContentType",
        "application/vnd.openxmlformats-officedocument.drawing+xml",
    );
    override_el.set_attr("PartName", format!("/{filename}"));
    content_types.push(override_el);

    Ok(Drawing {
        rel_filename: format!("xl/drawings/_rels/{drawing_name}.rels"),
        filename,
        root,
        rel_root,
    })
}

/// 图片负载转字节:二进制直通,字符串按 base64 解码
pub fn image_to_bytes(substitution: &Value) -> Option<Vec<u8>> {
    match substitution {
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::String(s) => match BASE64.decode(s.trim()) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                log::warn!("图片数据不是有效的 base64 字符串,跳过");
                None
            }
        },
        _ => None,
    }
}

/// 当前单元格落在某个合并区间里时,返回该区间的 EMU 尺寸
pub fn merge_cell_dimensions(
    sheet_root: &Element,
    dims: &SheetDims,
    cell_ref: &str,
) -> Option<(i64, i64)> {
    let cell = split_ref(cell_ref).ok()?;
    for merge_cell in sheet_root.find_all("mergeCells/mergeCell") {
        let Some(range) = merge_cell.attr("ref") else {
            continue;
        };
        let Some((start, end)) = split_range(range) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (split_ref(&start), split_ref(&end)) else {
            continue;
        };
        if cell.col_no < start.col_no
            || cell.col_no > end.col_no
            || cell.row < start.row
            || cell.row > end.row
        {
            continue;
        }
        let mut width = 0.0;
        for col in start.col_no..=end.col_no {
            width += dims.col_width(col);
        }
        let mut height = 0.0;
        for row in start.row..=end.row {
            height += dims.row_height(row);
        }
        return Some((column_width_to_emus(width), row_height_to_emus(height)));
    }
    None
}

/// 把一张图片落到 `cell` 所在位置。
/// `fit_to` 给定时撑满该尺寸,否则在合并单元格里撑满合并区间,
/// 普通单元格按 image_ratio 百分比缩放
#[allow(clippy::too_many_arguments)]
pub fn place_image(
    archive: &mut Archive,
    drawing: &mut Drawing,
    options: &Options,
    cell_ref: &str,
    substitution: &Value,
    fit_to: Option<(i64, i64)>,
) -> Result<()> {
    let Some(buffer) = image_to_bytes(substitution) else {
        return Ok(());
    };
    let Some((px_width, px_height)) = get_image_dimensions(&buffer) else {
        log::warn!("无法识别的图片格式,跳过");
        return Ok(());
    };

    let max_id = find_max_id(&drawing.rel_root, "Relationship", "Id", "rId")?;
    let max_file_id = archive.next_file_id("xl/media/image", ".jpg");

    let mut rel = Element::new("Relationship");
    rel.set_attr("Id", format!("rId{max_id}"));
    rel.set_attr("Type", IMAGE_RELATIONSHIP);
    rel.set_attr("Target", format!("../media/image{max_file_id}.jpg"));
    drawing.rel_root.push(rel);
    archive.set(format!("xl/media/image{max_file_id}.jpg"), buffer);

    let mut image_width = pixels_to_emus(px_width as f64);
    let mut image_height = pixels_to_emus(px_height as f64);
    if let Some((fit_width, fit_height)) = fit_to {
        // 按溢出更多的那条边等比缩小,撑满目标区域
        let width_rate = image_width as f64 / fit_width as f64;
        let height_rate = image_height as f64 / fit_height as f64;
        let rate = width_rate.max(height_rate);
        image_width = (image_width as f64 / rate).floor() as i64;
        image_height = (image_height as f64 / rate).floor() as i64;
    } else {
        let mut ratio = options.image_ratio;
        if ratio <= 0.0 {
            ratio = 100.0;
        }
        image_width = (image_width as f64 * ratio / 100.0).floor() as i64;
        image_height = (image_height as f64 * ratio / 100.0).floor() as i64;
    }

    let anchor_ref = split_ref(cell_ref)?;
    let mut anchor = Element::new("xdr:oneCellAnchor");

    let mut from = Element::new("xdr:from");
    let mut col = Element::new("xdr:col");
    col.set_text((char_to_num(&anchor_ref.col) - 1).to_string());
    from.push(col);
    let mut col_off = Element::new("xdr:colOff");
    col_off.set_text("0");
    from.push(col_off);
    let mut row = Element::new("xdr:row");
    row.set_text((anchor_ref.row - 1).to_string());
    from.push(row);
    let mut row_off = Element::new("xdr:rowOff");
    row_off.set_text("0");
    from.push(row_off);
    anchor.push(from);

    anchor.push(Element::with_attrs(
        "xdr:ext",
        &[
            ("cx", &image_width.to_string()),
            ("cy", &image_height.to_string()),
        ],
    ));

    let mut pic = Element::new("xdr:pic");
    let mut nv_pic_pr = Element::new("xdr:nvPicPr");
    nv_pic_pr.push(Element::with_attrs(
        "xdr:cNvPr",
        &[
            ("id", max_id.to_string().as_str()),
            ("name", format!("image_{max_id}").as_str()),
            ("descr", ""),
        ],
    ));
    let mut c_nv_pic_pr = Element::new("xdr:cNvPicPr");
    c_nv_pic_pr.push(Element::with_attrs("a:picLocks", &[("noChangeAspect", "1")]));
    nv_pic_pr.push(c_nv_pic_pr);
    pic.push(nv_pic_pr);

    let mut blip_fill = Element::new("xdr:blipFill");
    blip_fill.push(Element::with_attrs(
        "a:blip",
        &[
            (
                "xmlns:r",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
            ),
            ("r:embed", format!("rId{max_id}").as_str()),
        ],
    ));
    let mut stretch = Element::new("a:stretch");
    stretch.push(Element::new("a:fillRect"));
    blip_fill.push(stretch);
    pic.push(blip_fill);

    let mut sp_pr = Element::new("xdr:spPr");
    let mut xfrm = Element::new("a:xfrm");
    xfrm.push(Element::with_attrs("a:off", &[("x", "0"), ("y", "0")]));
    xfrm.push(Element::with_attrs(
        "a:ext",
        &[
            ("cx", &image_width.to_string()),
            ("cy", &image_height.to_string()),
        ],
    ));
    sp_pr.push(xfrm);
    let mut prst_geom = Element::with_attrs("a:prstGeom", &[("prst", "rect")]);
    prst_geom.push(Element::new("a:avLst"));
    sp_pr.push(prst_geom);
    pic.push(sp_pr);
    anchor.push(pic);

    anchor.push(Element::new("xdr:clientData"));
    drawing.root.push(anchor);
    Ok(())
}

/// 在 `from_row` 之后插入了 `nb_row` 行,把受影响的 twoCellAnchor 图片下移
pub fn move_all_images(drawing: &mut Drawing, from_row: u32, nb_row: u32, options: &Options) {
    let move_same_line = options.move_same_line_images;
    for anchor in drawing.root.children.iter_mut() {
        if anchor.tag != "xdr:twoCellAnchor" {
            continue;
        }
        let anchor_row: u32 = anchor
            .find("xdr:from/xdr:row")
            .and_then(|r| r.text.as_deref())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let affected = if move_same_line {
            anchor_row + 1 >= from_row
        } else {
            anchor_row + 1 > from_row
        };
        if !affected {
            continue;
        }
        for path in ["xdr:from/xdr:row", "xdr:to/xdr:row"] {
            if let Some(row_el) = anchor.find_mut(path) {
                let current: u32 = row_el.text().parse().unwrap_or(0);
                row_el.set_text((current + nb_row).to_string());
            }
        }
    }
}

pub(crate) fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

pub(crate) fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// 折叠路径里的 `..` 与 `.` 段(关系表的 Target 常是 ../ 开头)
pub(crate) fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(seg),
        }
    }
    parts.join("/")
}
