//! 占位符替换:单值、数组、表格、图片和超链接
//!
//! 逐行逐格扫描共享字符串单元格,按占位符类型改写单元格、
//! 插入行列,并同步合并区间、命名区域、表格范围和 dimension。

use crate::archive::Archive;
use crate::drawing::{Drawing, SheetDims, load_drawing, merge_cell_dimensions, move_all_images, place_image};
use crate::errors::{Result, XlsxError};
use crate::placeholder::{Placeholder, extract_placeholders};
use crate::reference::{char_to_num, is_range, join_range, next_col, next_row, num_to_char, split_range, split_ref};
use crate::shared_strings::SharedStringPool;
use crate::template::{HYPERLINK_RELATIONSHIP, NamedTable, SheetIdentifier, SheetRels, XlsxTemplate};
use crate::value::Value;
use crate::xmlelem::Element;

impl XlsxTemplate {
    /// 对一张工作表执行全部占位符替换
    pub fn substitute<'a>(
        &mut self,
        sheet: impl Into<SheetIdentifier<'a>>,
        substitutions: &Value,
    ) -> Result<()> {
        let sheet = self.load_sheet(sheet)?;
        let mut sheet_root = sheet.root;
        let mut named_tables = self.load_tables(&sheet_root, &sheet.filename)?;
        let (mut rels, rels_existed) = self.load_sheet_rels(&sheet.filename)?;
        // 行高列宽替换过程中不会变,开始前拍一次快照
        let dims = SheetDims::collect(&sheet_root);
        let mut drawing: Option<Drawing> = None;

        let mut total_rows_inserted: u32 = 0;
        let mut total_columns_inserted: i64 = 0;

        let source_rows = sheet_root
            .find_mut("sheetData")
            .ok_or_else(|| XlsxError::Xml("worksheet 缺少 sheetData".to_string()))?
            .take_children();
        let mut out_rows: Vec<Element> = Vec::with_capacity(source_rows.len());

        for mut row in source_rows {
            if row.tag != "row" {
                continue;
            }
            let current_row = get_current_row(&row, total_rows_inserted)?;
            row.set_attr("r", current_row.to_string());

            let mut cells: Vec<Element> = Vec::new();
            let mut cells_inserted: i64 = 0;
            let mut new_table_rows: Vec<Element> = Vec::new();

            'cells: for mut cell in row.take_children() {
                if cell.tag != "c" {
                    continue;
                }
                let mut append_cell = true;
                if let Some(reference) = cell.attr("r") {
                    let rewritten = get_current_cell(reference, current_row, cells_inserted)?;
                    cell.set_attr("r", rewritten);
                }

                // 只有共享字符串单元格可能带占位符
                if cell.attr("t") == Some("s") {
                    let string_index = cell
                        .find("v")
                        .and_then(|v| v.text.as_deref())
                        .and_then(|t| t.trim().parse::<usize>().ok());
                    // 字符串索引悬空的单元格直接丢弃
                    let Some(mut shared) = string_index
                        .and_then(|i| self.shared_strings.get(i))
                        .map(str::to_string)
                    else {
                        continue 'cells;
                    };

                    for ph in extract_placeholders(&shared.clone()) {
                        let mut substitution = substitutions
                            .get_path(&ph.name)
                            .cloned()
                            .unwrap_or_else(|| Value::String(String::new()));
                        let mut new_cells_inserted: i64 = 0;

                        if ph.full
                            && ph.is_table()
                            && let Value::Array(items) = &substitution
                        {
                            if ph.is_image() {
                                ensure_drawing(
                                    &self.archive,
                                    &mut self.content_types,
                                    &mut sheet_root,
                                    &sheet.filename,
                                    &mut rels,
                                    &mut drawing,
                                )?;
                            }
                            new_cells_inserted = substitute_table(
                                &mut self.shared_strings,
                                &mut self.archive,
                                &sheet_root,
                                &dims,
                                &self.option,
                                &row,
                                &mut new_table_rows,
                                &mut cells,
                                &mut cell,
                                &mut named_tables,
                                items,
                                ph.key.as_deref(),
                                &ph,
                                drawing.as_mut(),
                            )?;

                            // 单元素对象数组仍保留原单元格;数组值的表列
                            // 已经由数组替换插好,原格不能重复追加
                            if new_cells_inserted != 0 || !items.is_empty() {
                                if items.len() == 1 {
                                    append_cell = true;
                                }
                                if let Some(key) = ph.key.as_deref()
                                    && matches!(
                                        items.first().and_then(|e| e.get_key(key)),
                                        Some(Value::Array(_))
                                    )
                                {
                                    append_cell = false;
                                }
                            }

                            if new_cells_inserted != 0 {
                                cells_inserted += new_cells_inserted;
                                push_right(
                                    &mut self.workbook,
                                    &mut sheet_root,
                                    cell.attr("r").unwrap_or(""),
                                    new_cells_inserted,
                                )?;
                            }
                        } else if ph.full
                            && ph.is_normal()
                            && let Value::Array(items) = &substitution
                        {
                            // 数组展开自己往 cells 里塞克隆,原格丢弃
                            append_cell = false;
                            new_cells_inserted =
                                substitute_array(&mut self.shared_strings, &mut cells, &cell, items);

                            if new_cells_inserted != 0 {
                                cells_inserted += new_cells_inserted;
                                push_right(
                                    &mut self.workbook,
                                    &mut sheet_root,
                                    cell.attr("r").unwrap_or(""),
                                    new_cells_inserted,
                                )?;
                            }
                        } else if ph.ptype == "image"
                            && ph.full
                            && !matches!(substitution, Value::Array(_))
                        {
                            // 表列的 :image 后缀不走这里,没给数组时按标量处理
                            ensure_drawing(
                                &self.archive,
                                &mut self.content_types,
                                &mut sheet_root,
                                &sheet.filename,
                                &mut rels,
                                &mut drawing,
                            )?;
                            shared = substitute_scalar(
                                &mut self.shared_strings,
                                &mut cell,
                                &shared,
                                &ph,
                                &Value::String(String::new()),
                            );
                            if !substitution.is_null_or_empty()
                                && let Some(d) = drawing.as_mut()
                            {
                                let cell_ref = cell.attr("r").unwrap_or("").to_string();
                                let fit = merge_cell_dimensions(&sheet_root, &dims, &cell_ref);
                                place_image(
                                    &mut self.archive,
                                    d,
                                    &self.option,
                                    &cell_ref,
                                    &substitution,
                                    fit,
                                )?;
                            }
                        } else {
                            if let Some(key) = &ph.key {
                                substitution = substitutions
                                    .get_path(&format!("{}.{key}", ph.name))
                                    .cloned()
                                    .unwrap_or(Value::Null);
                            }
                            let scalar = match &substitution {
                                Value::Array(items) => {
                                    items.first().cloned().unwrap_or(Value::Null)
                                }
                                other => other.clone(),
                            };
                            shared = substitute_scalar(
                                &mut self.shared_strings,
                                &mut cell,
                                &shared,
                                &ph,
                                &scalar,
                            );
                        }
                    }
                }

                // 插入过列的话原单元格可能不再需要
                if append_cell {
                    cells.push(cell);
                }
            }

            row.children = cells;
            if cells_inserted != 0 {
                update_row_span(&mut row, cells_inserted);
                total_columns_inserted = total_columns_inserted.max(cells_inserted);
            }

            if new_table_rows.is_empty() {
                out_rows.push(row);
                continue;
            }
            let inserted_count = new_table_rows.len() as u32;
            if self.option.move_images {
                ensure_drawing(
                    &self.archive,
                    &mut self.content_types,
                    &mut sheet_root,
                    &sheet.filename,
                    &mut rels,
                    &mut drawing,
                )?;
                if let Some(d) = drawing.as_mut() {
                    move_all_images(d, current_row, inserted_count, &self.option);
                }
            }
            out_rows.push(row);
            for new_row in new_table_rows {
                out_rows.push(new_row);
                total_rows_inserted += 1;
            }
            push_down(
                &mut self.workbook,
                &mut sheet_root,
                &mut named_tables,
                current_row,
                inserted_count,
            )?;
        }

        if let Some(sheet_data) = sheet_root.find_mut("sheetData") {
            sheet_data.children = out_rows;
        }

        substitute_table_column_headers(&mut named_tables, substitutions)?;
        substitute_hyperlinks(&mut rels, substitutions);

        // 插入过行列的话扩大 dimension
        if (total_rows_inserted > 0 || total_columns_inserted > 0)
            && let Some(dimension) = sheet_root.find_mut("dimension")
            && let Some(range) = dimension.attr("ref").map(str::to_string)
            && let Some((start, end)) = split_range(&range)
        {
            let mut end_ref = split_ref(&end)?;
            end_ref.row += total_rows_inserted;
            let col_no = (char_to_num(&end_ref.col) as i64 + total_columns_inserted).max(0);
            end_ref.col = num_to_char(col_no as u32);
            dimension.set_attr(
                "ref",
                join_range(&start, &format!("{}{}", end_ref.col, end_ref.row)),
            );
        }

        // 公式单元格丢掉缓存值,打开时强制重算
        if let Some(sheet_data) = sheet_root.find_mut("sheetData") {
            for row in sheet_data.children.iter_mut().filter(|r| r.tag == "row") {
                for cell in row.children.iter_mut().filter(|c| c.tag == "c") {
                    if cell.children.iter().any(|c| c.tag == "f") {
                        cell.children.retain(|c| c.tag != "v");
                    }
                }
            }
        }

        self.archive
            .set(sheet.filename.clone(), sheet_root.to_document_bytes()?);
        self.archive
            .set(self.workbook_path.clone(), self.workbook.to_document_bytes()?);
        if rels_existed || !rels.root.children.is_empty() {
            self.archive
                .set(rels.filename.clone(), rels.root.to_document_bytes()?);
        }
        self.archive.set(
            "[Content_Types].xml".to_string(),
            self.content_types.to_document_bytes()?,
        );
        // calcChain 不再可信,Excel 打开时会重建
        if let Some(path) = self.calc_chain_path.clone()
            && self.archive.contains(&path)
        {
            self.archive.remove(&path);
        }

        self.write_shared_strings()?;
        self.write_tables(&named_tables)?;
        if let Some(d) = &drawing {
            self.write_drawing(d)?;
        }
        Ok(())
    }
}

fn ensure_drawing(
    archive: &Archive,
    content_types: &mut Element,
    sheet_root: &mut Element,
    sheet_filename: &str,
    rels: &mut SheetRels,
    drawing: &mut Option<Drawing>,
) -> Result<()> {
    if drawing.is_none() {
        *drawing = Some(load_drawing(
            archive,
            content_types,
            sheet_root,
            sheet_filename,
            rels,
        )?);
    }
    Ok(())
}

fn get_current_row(row: &Element, total_rows_inserted: u32) -> Result<u32> {
    let base: u32 = row
        .attr("r")
        .and_then(|r| r.parse().ok())
        .ok_or_else(|| XlsxError::InvalidReference(row.attr("r").unwrap_or("").to_string()))?;
    Ok(base + total_rows_inserted)
}

fn get_current_cell(reference: &str, current_row: u32, cells_inserted: i64) -> Result<String> {
    let cell_ref = split_ref(reference)?;
    let col_no = (cell_ref.col_no as i64 + cells_inserted).max(0);
    Ok(format!("{}{current_row}", num_to_char(col_no as u32)))
}

/// 插了列之后修正 row 的 spans 属性
fn update_row_span(row: &mut Element, cells_inserted: i64) {
    if cells_inserted == 0 {
        return;
    }
    let Some(spans) = row.attr("spans") else {
        return;
    };
    let Some((min, max)) = spans.split_once(':') else {
        return;
    };
    let (Ok(min), Ok(max)) = (min.parse::<i64>(), max.parse::<i64>()) else {
        return;
    };
    row.set_attr("spans", format!("{min}:{}", max + cells_inserted));
}

/// 把一个值写进单元格,返回写入的字符串形式。
/// `=` 开头的字符串按公式写入,数值与日期写裸值,
/// 布尔写 t="b",其余进共享字符串池
pub(crate) fn insert_cell_value(
    pool: &mut SharedStringPool,
    cell: &mut Element,
    substitution: &Value,
) -> String {
    let stringified = substitution.stringify();

    if let Value::String(s) = substitution
        && let Some(formula) = s.strip_prefix('=')
    {
        let mut f = Element::new("f");
        f.set_text(formula);
        // 缓存值随后会被统一清理
        cell.insert(1, f);
        cell.remove_attr("t");
        return formula.to_string();
    }

    if cell.find("v").is_none() {
        cell.push(Element::new("v"));
    }
    match substitution {
        Value::Number(_) | Value::DateTime(_) => {
            cell.remove_attr("t");
        }
        Value::Bool(_) => {
            cell.set_attr("t", "b");
        }
        _ => {
            cell.set_attr("t", "s");
            let index = pool.string_index(&stringified);
            if let Some(v) = cell.find_mut("v") {
                v.set_text(index.to_string());
            }
            return stringified;
        }
    }
    if let Some(v) = cell.find_mut("v") {
        v.set_text(stringified.clone());
    }
    stringified
}

/// 单值替换:占位符占满整格时直接写值,
/// 否则替换进字符串再整体入池
pub(crate) fn substitute_scalar(
    pool: &mut SharedStringPool,
    cell: &mut Element,
    shared: &str,
    ph: &Placeholder,
    substitution: &Value,
) -> String {
    if ph.full {
        insert_cell_value(pool, cell, substitution)
    } else {
        let new_string = shared.replacen(&ph.placeholder, &substitution.stringify(), 1);
        cell.set_attr("t", "s");
        insert_cell_value(pool, cell, &Value::String(new_string))
    }
}

/// 横向展开数组,每个元素克隆一格。
/// 返回净插入的格数(原格算被替换掉,所以从 -1 起算)
pub(crate) fn substitute_array(
    pool: &mut SharedStringPool,
    cells: &mut Vec<Element>,
    cell: &Element,
    substitution: &[Value],
) -> i64 {
    let mut new_cells_inserted: i64 = -1;
    let mut current_cell = cell.attr("r").unwrap_or("").to_string();

    for element in substitution {
        new_cells_inserted += 1;
        if new_cells_inserted > 0 {
            current_cell = next_col(&current_cell);
        }
        let mut new_cell = cell.clone();
        insert_cell_value(pool, &mut new_cell, element);
        new_cell.set_attr("r", current_cell.clone());
        cells.push(new_cell);
    }
    new_cells_inserted
}

/// 表格替换:首个元素落在原行,其余元素落进新行,
/// 命名表格范围随之纵向扩展。返回原行上净插入的格数
#[allow(clippy::too_many_arguments)]
pub(crate) fn substitute_table(
    pool: &mut SharedStringPool,
    archive: &mut Archive,
    sheet_root: &Element,
    dims: &SheetDims,
    options: &crate::template::Options,
    row: &Element,
    new_table_rows: &mut Vec<Element>,
    cells: &mut Vec<Element>,
    cell: &mut Element,
    named_tables: &mut [NamedTable],
    substitution: &[Value],
    key: Option<&str>,
    ph: &Placeholder,
    mut drawing: Option<&mut Drawing>,
) -> Result<i64> {
    let mut new_cells_inserted: i64 = 0;

    // 空数组把格子清空但留在原位
    if substitution.is_empty() {
        cell.remove_attr("t");
        cell.children.clear();
        return Ok(new_cells_inserted);
    }

    let template_cell_ref = cell.attr("r").unwrap_or("").to_string();
    let parent_tables: Vec<usize> = named_tables
        .iter()
        .enumerate()
        .filter_map(|(index, table)| {
            let range = table.root.attr("ref")?;
            let (start, end) = split_range(range)?;
            let (start, end) = (split_ref(&start).ok()?, split_ref(&end).ok()?);
            let cell_ref = split_ref(&template_cell_ref).ok()?;
            crate::reference::is_within(&cell_ref, &start, &end).then_some(index)
        })
        .collect();

    let is_image = ph.is_image();
    for (idx, element) in substitution.iter().enumerate() {
        let value = key
            .and_then(|k| element.get_path(k))
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));

        if idx == 0 {
            // 落在占位符所在的原行
            if let Value::Array(items) = &value {
                new_cells_inserted = substitute_array(pool, cells, cell, items);
            } else if is_image && !matches!(&value, Value::String(s) if s.is_empty()) {
                substitute_scalar(pool, cell, &ph.placeholder, ph, &Value::String(String::new()));
                if !value.is_null_or_empty()
                    && let Some(d) = drawing.as_deref_mut()
                {
                    let fit = merge_cell_dimensions(sheet_root, dims, &template_cell_ref);
                    place_image(archive, d, options, &template_cell_ref, &value, fit)?;
                }
            } else {
                insert_cell_value(pool, cell, &value);
            }
            continue;
        }

        // 复用本次已插入的新行,不够就克隆一行出来
        if idx - 1 >= new_table_rows.len() {
            let mut new_row = row.clone_shallow();
            let base = get_current_row(row, new_table_rows.len() as u32 + 1)?;
            new_row.set_attr("r", base.to_string());
            new_table_rows.push(new_row);
        }
        let new_row_ref: u32 = new_table_rows[idx - 1]
            .attr("r")
            .and_then(|r| r.parse().ok())
            .unwrap_or(0);

        let mut new_cell = cell.clone();
        let column = split_ref(new_cell.attr("r").unwrap_or(""))?.col;
        let new_cell_ref = format!("{column}{new_row_ref}");
        new_cell.set_attr("r", new_cell_ref.clone());

        let new_row = &mut new_table_rows[idx - 1];
        if let Value::Array(items) = &value {
            let mut new_cells: Vec<Element> = Vec::new();
            let inserted_on_new_row = substitute_array(pool, &mut new_cells, &new_cell, items);
            for c in new_cells {
                new_row.push(c);
            }
            update_row_span(new_row, inserted_on_new_row);
        } else if is_image && !matches!(&value, Value::String(s) if s.is_empty()) {
            substitute_scalar(
                pool,
                &mut new_cell,
                &ph.placeholder,
                ph,
                &Value::String(String::new()),
            );
            if !value.is_null_or_empty()
                && let Some(d) = drawing.as_deref_mut()
            {
                // 合并区间要到替换结束才更新,尺寸以模板格为准
                let fit = merge_cell_dimensions(sheet_root, dims, &template_cell_ref);
                place_image(archive, d, options, &new_cell_ref, &value, fit)?;
            }
            new_row.push(new_cell);
        } else {
            insert_cell_value(pool, &mut new_cell, &value);
            new_row.push(new_cell);
        }

        // 新行超出命名表格范围时纵向扩一行
        for index in &parent_tables {
            let table_root = &mut named_tables[*index].root;
            let Some(range) = table_root.attr("ref").map(str::to_string) else {
                continue;
            };
            let Some((start, end)) = split_range(&range) else {
                continue;
            };
            let (start_ref, end_ref) = (split_ref(&start)?, split_ref(&end)?);
            let cell_ref = split_ref(&new_cell_ref)?;
            if !crate::reference::is_within(&cell_ref, &start_ref, &end_ref) {
                let new_range = join_range(&start, &next_row(&end));
                table_root.set_attr("ref", new_range.clone());
                if let Some(auto_filter) = table_root.find_mut("autoFilter") {
                    auto_filter.set_attr("ref", new_range);
                }
            }
        }
    }

    Ok(new_cells_inserted)
}

/// 当前行里插入了列,右侧同一行的合并区间与命名区域右移
pub(crate) fn push_right(
    workbook: &mut Element,
    sheet: &mut Element,
    current_cell: &str,
    num_cols: i64,
) -> Result<()> {
    let cell_ref = split_ref(current_cell)?;
    let current_row = cell_ref.row;
    let current_col = cell_ref.col_no;

    sheet.for_each_mut("mergeCells/mergeCell", |merge_cell| {
        let Some(range) = merge_cell.attr("ref") else {
            return;
        };
        let Some((start, end)) = split_range(range) else {
            return;
        };
        let (Ok(mut start), Ok(mut end)) = (split_ref(&start), split_ref(&end)) else {
            return;
        };
        if start.row == current_row && current_col < start.col_no {
            start.col = num_to_char((start.col_no as i64 + num_cols).max(0) as u32);
            end.col = num_to_char((end.col_no as i64 + num_cols).max(0) as u32);
            merge_cell.set_attr(
                "ref",
                join_range(
                    &format!("{}{}", start.col, start.row),
                    &format!("{}{}", end.col, end.row),
                ),
            );
        }
    });

    workbook.for_each_mut("definedNames/definedName", |name| {
        let reference = name.text().to_string();
        if is_range(&reference) {
            let Some((start, end)) = split_range(&reference) else {
                return;
            };
            let (Ok(mut start), Ok(mut end)) = (split_ref(&start), split_ref(&end)) else {
                return;
            };
            if start.row == current_row && current_col < start.col_no {
                start.col = num_to_char((start.col_no as i64 + num_cols).max(0) as u32);
                end.col = num_to_char((end.col_no as i64 + num_cols).max(0) as u32);
                name.set_text(join_range(
                    &crate::reference::join_ref(&start),
                    &crate::reference::join_ref(&end),
                ));
            }
        } else {
            let Ok(mut named) = split_ref(&reference) else {
                return;
            };
            if named.row == current_row && current_col < named.col_no {
                named.col = num_to_char((named.col_no as i64 + num_cols).max(0) as u32);
                name.set_text(crate::reference::join_ref(&named));
            }
        }
    });
    Ok(())
}

/// 插入了新行,下方的合并区间、命名表格和命名区域整体下移;
/// 当前行上的合并区间在每个新行上各复制一份
pub(crate) fn push_down(
    workbook: &mut Element,
    sheet: &mut Element,
    tables: &mut [NamedTable],
    current_row: u32,
    num_rows: u32,
) -> Result<()> {
    if let Some(merge_cells) = sheet.find_mut("mergeCells") {
        let mut appended: Vec<Element> = Vec::new();
        for merge_cell in merge_cells
            .children
            .iter_mut()
            .filter(|c| c.tag == "mergeCell")
        {
            let Some(range) = merge_cell.attr("ref") else {
                continue;
            };
            let Some((start, end)) = split_range(range) else {
                continue;
            };
            let (Ok(mut start), Ok(mut end)) = (split_ref(&start), split_ref(&end)) else {
                continue;
            };
            if start.row > current_row {
                start.row += num_rows;
                end.row += num_rows;
                merge_cell.set_attr(
                    "ref",
                    join_range(
                        &format!("{}{}", start.col, start.row),
                        &format!("{}{}", end.col, end.row),
                    ),
                );
            } else if start.row == current_row {
                for _ in 1..=num_rows {
                    start.row += 1;
                    end.row += 1;
                    let mut copy = merge_cell.clone();
                    copy.set_attr(
                        "ref",
                        join_range(
                            &format!("{}{}", start.col, start.row),
                            &format!("{}{}", end.col, end.row),
                        ),
                    );
                    appended.push(copy);
                }
            }
        }
        merge_cells.children.append(&mut appended);
        let count = merge_cells
            .children
            .iter()
            .filter(|c| c.tag == "mergeCell")
            .count();
        merge_cells.set_attr("count", count.to_string());
    }

    for table in tables.iter_mut() {
        let Some(range) = table.root.attr("ref").map(str::to_string) else {
            continue;
        };
        let Some((start, end)) = split_range(&range) else {
            continue;
        };
        let (mut start, mut end) = (split_ref(&start)?, split_ref(&end)?);
        if start.row > current_row {
            start.row += num_rows;
            end.row += num_rows;
            let new_range = join_range(
                &format!("{}{}", start.col, start.row),
                &format!("{}{}", end.col, end.row),
            );
            table.root.set_attr("ref", new_range.clone());
            if let Some(auto_filter) = table.root.find_mut("autoFilter") {
                auto_filter.set_attr("ref", new_range);
            }
        }
    }

    workbook.for_each_mut("definedNames/definedName", |name| {
        let reference = name.text().to_string();
        if is_range(&reference) {
            let Some((start, end)) = split_range(&reference) else {
                return;
            };
            let (Ok(mut start), Ok(mut end)) = (split_ref(&start), split_ref(&end)) else {
                return;
            };
            if start.row > current_row {
                start.row += num_rows;
                end.row += num_rows;
                name.set_text(join_range(
                    &crate::reference::join_ref(&start),
                    &crate::reference::join_ref(&end),
                ));
            }
        } else {
            let Ok(mut named) = split_ref(&reference) else {
                return;
            };
            if named.row > current_row {
                named.row += num_rows;
                name.set_text(crate::reference::join_ref(&named));
            }
        }
    });
    Ok(())
}

/// 表头里的占位符:数组值横向长出新列,单值原地替换名字
pub(crate) fn substitute_table_column_headers(
    tables: &mut [NamedTable],
    substitutions: &Value,
) -> Result<()> {
    for table in tables.iter_mut() {
        let root = &mut table.root;
        let Some(range) = root.attr("ref").map(str::to_string) else {
            continue;
        };
        let Some((range_start, mut range_end)) = split_range(&range) else {
            continue;
        };

        let mut idx: u32 = 0;
        let mut inserted: u32 = 0;
        if let Some(columns) = root.find_mut("tableColumns") {
            let mut new_columns: Vec<Element> = Vec::new();
            for mut col in columns.take_children() {
                if col.tag != "tableColumn" {
                    continue;
                }
                idx += 1;
                col.set_attr("id", idx.to_string());

                let mut name = col.attr("name").unwrap_or("").to_string();
                let mut clones: Vec<Element> = Vec::new();
                for ph in extract_placeholders(&name.clone()) {
                    let Some(substitution) = substitutions.get_key(&ph.name) else {
                        continue;
                    };
                    if ph.full
                        && ph.is_normal()
                        && let Value::Array(items) = substitution
                    {
                        for (i, element) in items.iter().enumerate() {
                            if i == 0 {
                                col.set_attr("name", element.stringify());
                            } else {
                                let mut new_col = col.clone();
                                idx += 1;
                                inserted += 1;
                                new_col.set_attr("id", idx.to_string());
                                new_col.set_attr("name", element.stringify());
                                range_end = next_col(&range_end);
                                clones.push(new_col);
                            }
                        }
                    } else {
                        name = name.replacen(&ph.placeholder, &substitution.stringify(), 1);
                        col.set_attr("name", name.clone());
                    }
                }
                new_columns.push(col);
                new_columns.append(&mut clones);
            }
            columns.children = new_columns;
            if inserted > 0 {
                columns.set_attr("count", idx.to_string());
            }
        }

        if inserted > 0 {
            let new_range = join_range(&range_start, &range_end);
            root.set_attr("ref", new_range.clone());
            if let Some(auto_filter) = root.find_mut("autoFilter") {
                auto_filter.set_attr("ref", new_range);
            }
        }

        // 带合计行的表格:筛选区钉在数据区,ref 多留一行
        if root.attr("totalsRowCount").is_some() {
            let (start_ref, mut end_ref) = (split_ref(&range_start)?, split_ref(&range_end)?);
            let data_range = join_range(
                &crate::reference::join_ref(&start_ref),
                &crate::reference::join_ref(&end_ref),
            );
            if let Some(auto_filter) = root.find_mut("autoFilter") {
                auto_filter.set_attr("ref", data_range);
            }
            end_ref.row += 1;
            root.set_attr(
                "ref",
                join_range(
                    &crate::reference::join_ref(&start_ref),
                    &crate::reference::join_ref(&end_ref),
                ),
            );
        }
    }
    Ok(())
}

/// 超链接 Target 里的占位符。
/// Excel 会把 URL 编码过的占位符再编码一次,所以先解两层
pub(crate) fn substitute_hyperlinks(rels: &mut SheetRels, substitutions: &Value) {
    for relationship in rels
        .root
        .children
        .iter_mut()
        .filter(|c| c.tag == "Relationship")
    {
        if relationship.attr("Type") != Some(HYPERLINK_RELATIONSHIP) {
            continue;
        }
        let mut target = decode_uri(&decode_uri(relationship.attr("Target").unwrap_or("")));
        for ph in extract_placeholders(&target.clone()) {
            let Some(substitution) = substitutions.get_key(&ph.name) else {
                continue;
            };
            target = target.replacen(&ph.placeholder, &substitution.stringify(), 1);
            relationship.set_attr("Target", encode_uri(&target));
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub(crate) fn decode_uri(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(high), Some(low)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2]))
        {
            out.push(high * 16 + low);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(crate) fn encode_uri(s: &str) -> String {
    // URI 保留字符和非保留字符都不动,其余按 UTF-8 逐字节转义
    fn keep(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b";,/?:@&=+$-_.!~*'()#".contains(&b)
    }
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if keep(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlelem::parse_document;
    use chrono::{TimeZone, Utc};

    fn string_cell(reference: &str, index: usize) -> Element {
        let mut cell = Element::new("c");
        cell.set_attr("r", reference);
        cell.set_attr("t", "s");
        let mut v = Element::new("v");
        v.set_text(index.to_string());
        cell.push(v);
        cell
    }

    #[test]
    fn test_insert_cell_value_number() {
        let mut pool = SharedStringPool::new();
        let mut cell = string_cell("A1", 0);
        let out = insert_cell_value(&mut pool, &mut cell, &Value::Number(42.5));
        assert_eq!(out, "42.5");
        assert_eq!(cell.attr("t"), None);
        assert_eq!(cell.find("v").unwrap().text(), "42.5");
    }

    #[test]
    fn test_insert_cell_value_bool_and_string() {
        let mut pool = SharedStringPool::new();
        let mut cell = string_cell("A1", 0);
        insert_cell_value(&mut pool, &mut cell, &Value::Bool(true));
        assert_eq!(cell.attr("t"), Some("b"));
        assert_eq!(cell.find("v").unwrap().text(), "1");

        let mut cell = string_cell("B1", 0);
        insert_cell_value(&mut pool, &mut cell, &Value::from("hello"));
        assert_eq!(cell.attr("t"), Some("s"));
        assert_eq!(pool.get(0), Some("hello"));
        assert_eq!(cell.find("v").unwrap().text(), "0");
    }

    #[test]
    fn test_insert_cell_value_formula() {
        let mut pool = SharedStringPool::new();
        let mut cell = string_cell("A1", 0);
        let out = insert_cell_value(&mut pool, &mut cell, &Value::from("=SUM(A1:B1)"));
        assert_eq!(out, "SUM(A1:B1)");
        assert_eq!(cell.attr("t"), None);
        assert_eq!(cell.find("f").unwrap().text(), "SUM(A1:B1)");
    }

    #[test]
    fn test_insert_cell_value_date() {
        let mut pool = SharedStringPool::new();
        let mut cell = string_cell("A1", 0);
        let date = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        insert_cell_value(&mut pool, &mut cell, &Value::DateTime(date));
        assert_eq!(cell.attr("t"), None);
        assert_eq!(cell.find("v").unwrap().text(), "41275");
    }

    #[test]
    fn test_substitute_scalar_partial() {
        let mut pool = SharedStringPool::new();
        pool.add_shared_string("Hello ${name}!");
        let mut cell = string_cell("A1", 0);
        let ph = &extract_placeholders("Hello ${name}!")[0];
        assert!(!ph.full);
        let out = substitute_scalar(&mut pool, &mut cell, "Hello ${name}!", ph, &Value::from("John"));
        assert_eq!(out, "Hello John!");
        assert_eq!(cell.attr("t"), Some("s"));
        // 组合后的字符串整体入池
        let index: usize = cell.find("v").unwrap().text().parse().unwrap();
        assert_eq!(pool.get(index), Some("Hello John!"));
    }

    #[test]
    fn test_substitute_array_counts() {
        let mut pool = SharedStringPool::new();
        let cell = string_cell("B2", 0);
        let mut cells = Vec::new();
        let values = vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)];
        let inserted = substitute_array(&mut pool, &mut cells, &cell, &values);
        assert_eq!(inserted, 2);
        let refs: Vec<&str> = cells.iter().map(|c| c.attr("r").unwrap()).collect();
        assert_eq!(refs, vec!["B2", "C2", "D2"]);

        // 空数组净插入 -1,原格由调用方丢弃
        let mut cells = Vec::new();
        assert_eq!(substitute_array(&mut pool, &mut cells, &cell, &[]), -1);
        assert!(cells.is_empty());
    }

    #[test]
    fn test_update_row_span() {
        let mut row = Element::new("row");
        row.set_attr("spans", "1:5");
        update_row_span(&mut row, 3);
        assert_eq!(row.attr("spans"), Some("1:8"));
        // 没有 spans 属性时不动
        let mut bare = Element::new("row");
        update_row_span(&mut bare, 3);
        assert_eq!(bare.attr("spans"), None);
    }

    #[test]
    fn test_push_right_moves_merges_and_names() {
        let mut sheet = parse_document(
            br#"<worksheet><mergeCells count="2">
  <mergeCell ref="D1:E1"/>
  <mergeCell ref="B2:C2"/>
</mergeCells></worksheet>"#,
        )
        .unwrap();
        let mut workbook = parse_document(
            b"<workbook><definedNames><definedName name=\"x\">F1</definedName></definedNames></workbook>",
        )
        .unwrap();
        push_right(&mut workbook, &mut sheet, "B1", 2).unwrap();
        let refs: Vec<&str> = sheet
            .find_all("mergeCells/mergeCell")
            .iter()
            .map(|m| m.attr("ref").unwrap())
            .collect();
        // 同一行且在右边的右移,其他行不动
        assert_eq!(refs, vec!["F1:G1", "B2:C2"]);
        assert_eq!(
            workbook.find("definedNames/definedName").unwrap().text(),
            "H1"
        );
    }

    #[test]
    fn test_push_down_duplicates_current_row_merges() {
        let mut sheet = parse_document(
            br#"<worksheet><mergeCells count="2">
  <mergeCell ref="A2:B2"/>
  <mergeCell ref="A5:B5"/>
</mergeCells></worksheet>"#,
        )
        .unwrap();
        let mut workbook = Element::new("workbook");
        push_down(&mut workbook, &mut sheet, &mut [], 2, 2).unwrap();
        let merge_cells = sheet.find("mergeCells").unwrap();
        let refs: Vec<&str> = merge_cells
            .children
            .iter()
            .map(|m| m.attr("ref").unwrap())
            .collect();
        // 当前行的合并在每个新行上复制,下方的下移
        assert_eq!(refs, vec!["A2:B2", "A7:B7", "A3:B3", "A4:B4"]);
        assert_eq!(merge_cells.attr("count"), Some("4"));
    }

    #[test]
    fn test_substitute_table_column_headers_array() {
        let mut tables = vec![NamedTable {
            filename: "xl/tables/table1.xml".to_string(),
            root: parse_document(
                br#"<table ref="A1:B3">
  <autoFilter ref="A1:B3"/>
  <tableColumns count="2">
    <tableColumn id="1" name="Name"/>
    <tableColumn id="2" name="${headers}"/>
  </tableColumns>
</table>"#,
            )
            .unwrap(),
        }];
        let subs = Value::from(serde_json::json!({"headers": ["Q1", "Q2", "Q3"]}));
        substitute_table_column_headers(&mut tables, &subs).unwrap();
        let root = &tables[0].root;
        assert_eq!(root.attr("ref"), Some("A1:D3"));
        let names: Vec<&str> = root
            .find_all("tableColumns/tableColumn")
            .iter()
            .map(|c| c.attr("name").unwrap())
            .collect();
        assert_eq!(names, vec!["Name", "Q1", "Q2", "Q3"]);
        let ids: Vec<&str> = root
            .find_all("tableColumns/tableColumn")
            .iter()
            .map(|c| c.attr("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(
            root.find("tableColumns").unwrap().attr("count"),
            Some("4")
        );
        assert_eq!(root.find("autoFilter").unwrap().attr("ref"), Some("A1:D3"));
    }

    #[test]
    fn test_substitute_hyperlinks() {
        let mut rels = SheetRels {
            filename: "xl/worksheets/_rels/sheet1.xml.rels".to_string(),
            root: parse_document(format!(
                r#"<Relationships><Relationship Id="rId1" Type="{HYPERLINK_RELATIONSHIP}" Target="https://example.com/?q=%2524%257Bquery%257D"/></Relationships>"#
            ).as_bytes())
            .unwrap(),
        };
        let subs = Value::from(serde_json::json!({"query": "hello world"}));
        substitute_hyperlinks(&mut rels, &subs);
        let target = rels.root.children[0].attr("Target").unwrap();
        assert_eq!(target, "https://example.com/?q=hello%20world");
    }

    #[test]
    fn test_uri_coding() {
        assert_eq!(decode_uri("a%20b%24"), "a b$");
        assert_eq!(decode_uri("%2524"), "%24");
        assert_eq!(encode_uri("a b/c?x=1"), "a%20b/c?x=1");
        assert_eq!(encode_uri("中"), "%E4%B8%AD");
    }

    #[test]
    fn test_get_current_cell() {
        assert_eq!(get_current_cell("B5", 7, 0).unwrap(), "B7");
        assert_eq!(get_current_cell("B5", 5, 3).unwrap(), "E5");
    }
}
