use wasm_bindgen::JsValue;
use wasm_bindgen::prelude::*;

pub mod archive;
pub mod drawing;
pub mod errors;
pub mod imagesize;
pub mod placeholder;
pub mod reference;
pub mod shared_strings;
pub mod substitute;
pub mod template;
pub mod value;
pub mod xmlelem;

// 重新导出常用的类型和函数
pub use errors::XlsxError;
pub use imagesize::get_image_dimensions;
pub use template::{Options, XlsxTemplate};
pub use value::Value;

/// 当 `console_error_panic_hook` 功能启用时，我们可以调用 `set_panic_hook` 函数
/// 至少一次在初始化过程中，以便在 panic 时获得更好的错误消息。
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// 主要的 XLSX 模板处理器:`data_json` 是工作表名到替换值表的映射,
/// 逐表替换后返回 base64 编码的新文件
#[wasm_bindgen]
pub fn render(zip_bytes: Vec<u8>, data_json: &str) -> Result<JsValue, JsValue> {
    let data: serde_json::Value = serde_json::from_str(data_json)
        .map_err(|e| JsValue::from_str(&format!("JSON 解析错误: {e}")))?;

    let mut template = XlsxTemplate::from_bytes(&zip_bytes, Options::default())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    if let serde_json::Value::Object(map) = data {
        for (sheet_name, values) in map {
            let values: Value = values.into();
            template
                .substitute(sheet_name.as_str(), &values)
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
        }
    }

    let result = template
        .generate_base64()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(JsValue::from(result))
}
