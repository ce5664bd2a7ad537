//! Element and data segments.
//!
//! Pass 1 validates each segment's shape as its section is decoded. Pass 2
//! re-reads both sections once every table and memory has its final size,
//! checks all segments against those sizes, and only then writes them.

use tracing::debug;
use wasmparser::{DataKind, ElementItems, ElementKind, Operator, Parser, Payload};
use wisp_types::{ErrorCode, ValueType};

use crate::compiler::ModuleCompiler;
use crate::error::{invalid, CodegenResult};

/// An active element segment, resolved to environment indices.
#[derive(Debug)]
pub(crate) struct ElemSegment {
    pub table_index: usize,
    pub offset: u32,
    pub func_indexes: Vec<Option<u32>>,
    /// Byte offset of the segment in the binary.
    pub position: usize,
}

/// An active data segment borrowing its bytes from the binary.
#[derive(Debug)]
pub(crate) struct DataSegment<'a> {
    pub memory_index: usize,
    pub offset: u32,
    pub data: &'a [u8],
    pub position: usize,
}

fn segment_range(offset: u32, len: usize) -> (u64, u64) {
    let start = u64::from(offset);
    (start, start + len as u64)
}

impl ModuleCompiler<'_> {
    fn segment_offset(&self, expr: &wasmparser::ConstExpr<'_>, what: &str) -> CodegenResult<u32> {
        let value = self.eval_init_expr(expr)?;
        if value.ty != ValueType::I32 {
            return Err(invalid(
                ErrorCode::TYPE_MISMATCH,
                format!("type mismatch in {what} offset, expected i32 but got {}", value.ty),
            ));
        }
        Ok(value.value.as_i32())
    }

    pub(crate) fn read_elem_segment(
        &self,
        elem: wasmparser::Element<'_>,
    ) -> CodegenResult<ElemSegment> {
        let (table_index, offset_expr) = match elem.kind {
            ElementKind::Active {
                table_index,
                offset_expr,
            } => (table_index.unwrap_or(0), offset_expr),
            ElementKind::Passive | ElementKind::Declared => {
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    "passive and declared element segments are not supported",
                ))
            }
        };
        let table_index = match self.module().table_index {
            Some(table) if table_index == 0 => table,
            Some(_) => {
                return Err(invalid(
                    ErrorCode::MISSING_TABLE,
                    format!("invalid table index: {table_index}"),
                ))
            }
            None => {
                return Err(invalid(
                    ErrorCode::MISSING_TABLE,
                    "elem section without table section",
                ))
            }
        };
        let offset = self.segment_offset(&offset_expr, "elem segment")?;

        let mut func_indexes = Vec::new();
        match elem.items {
            ElementItems::Functions(reader) => {
                for func_index in reader {
                    func_indexes.push(Some(self.translate_func(func_index?)? as u32));
                }
            }
            ElementItems::Expressions(_, reader) => {
                for expr in reader {
                    let expr = expr?;
                    let mut ops = expr.get_operators_reader();
                    let entry = match ops.read()? {
                        Operator::RefFunc { function_index } => {
                            Some(self.translate_func(function_index)? as u32)
                        }
                        Operator::RefNull { .. } => None,
                        other => {
                            return Err(invalid(
                                ErrorCode::INVALID_INIT_EXPR,
                                format!("invalid element expression: {other:?}"),
                            ))
                        }
                    };
                    func_indexes.push(entry);
                }
            }
        }

        Ok(ElemSegment {
            table_index,
            offset,
            func_indexes,
            position: elem.range.start,
        })
    }

    pub(crate) fn read_data_segment<'d>(
        &self,
        data: &wasmparser::Data<'d>,
    ) -> CodegenResult<DataSegment<'d>> {
        let (memory_index, offset_expr) = match &data.kind {
            DataKind::Active {
                memory_index,
                offset_expr,
            } => (*memory_index, offset_expr),
            DataKind::Passive => {
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    "passive data segments are not supported",
                ))
            }
        };
        let memory_index = match self.module().memory_index {
            Some(memory) if memory_index == 0 => memory,
            Some(_) => {
                return Err(invalid(
                    ErrorCode::MISSING_MEMORY,
                    format!("invalid memory index: {memory_index}"),
                ))
            }
            None => {
                return Err(invalid(
                    ErrorCode::MISSING_MEMORY,
                    "data section without memory section",
                ))
            }
        };
        let offset = self.segment_offset(offset_expr, "data segment")?;
        Ok(DataSegment {
            memory_index,
            offset,
            data: data.data,
            position: data.range.start,
        })
    }

    // ── Pass 2 ───────────────────────────────────────────────────────────

    /// Bounds-check every segment of `wasm`, then write them all.
    pub(crate) fn apply_segments(&mut self, wasm: &[u8]) -> CodegenResult<()> {
        let mut elems = Vec::new();
        let mut datas = Vec::new();
        for payload in Parser::new(0).parse_all(wasm) {
            match payload? {
                Payload::ElementSection(reader) => {
                    for elem in reader {
                        elems.push(self.read_elem_segment(elem?)?);
                    }
                }
                Payload::DataSection(reader) => {
                    for data in reader {
                        datas.push(self.read_data_segment(&data?)?);
                    }
                }
                _ => {}
            }
        }

        for segment in &elems {
            let size = self.env.tables[segment.table_index].func_indexes.len() as u64;
            let (start, end) = segment_range(segment.offset, segment.func_indexes.len());
            if end > size {
                return Err(invalid(
                    ErrorCode::SEGMENT_OUT_OF_BOUNDS,
                    format!("elem segment offset is out of bounds: [{start}, {end}) >= max value {size}"),
                )
                .at(segment.position));
            }
        }
        for segment in &datas {
            let size = self.env.memories[segment.memory_index].byte_size() as u64;
            let (start, end) = segment_range(segment.offset, segment.data.len());
            if end > size {
                return Err(invalid(
                    ErrorCode::SEGMENT_OUT_OF_BOUNDS,
                    format!("data segment is out of bounds: [{start}, {end}) >= max value {size}"),
                )
                .at(segment.position));
            }
        }

        let elem_count = elems.len();
        for segment in elems {
            let start = segment.offset as usize;
            let table = &mut self.env.tables[segment.table_index];
            table.func_indexes[start..start + segment.func_indexes.len()]
                .copy_from_slice(&segment.func_indexes);
        }
        for segment in &datas {
            let start = segment.offset as usize;
            let memory = &mut self.env.memories[segment.memory_index];
            memory.data[start..start + segment.data.len()].copy_from_slice(segment.data);
        }
        debug!(
            module = self.module_index,
            elem_segments = elem_count,
            data_segments = datas.len(),
            "segments applied"
        );
        Ok(())
    }
}
