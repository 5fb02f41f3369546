// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Type tree mapping between file `Type` messages and arrow schemas.
//!
//! Column ids are assigned in preorder with the root struct at id 0. The
//! nesting level of a column counts its LIST ancestors; list elements live
//! one level below their list.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};

use crate::common::status::{ColumnarError, Result};

use super::proto::{Type, TypeKind};

pub const DEFAULT_LIST_ELEMENT_NAME: &str = "item";

/// One node of the file type tree below the root struct.
#[derive(Clone, Debug)]
pub struct OrcColumn {
    pub id: u32,
    pub kind: TypeKind,
    pub level: usize,
    pub field: FieldRef,
    pub children: Vec<OrcColumn>,
}

impl OrcColumn {
    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn nullable(&self) -> bool {
        self.field.is_nullable()
    }

    /// Ids of this column and all descendants, in preorder.
    pub fn collect_ids(&self, out: &mut Vec<u32>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }

    pub fn max_level(&self) -> usize {
        self.children
            .iter()
            .map(OrcColumn::max_level)
            .fold(self.level, usize::max)
    }
}

/// Column name and nested child names of one output column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnNameInfo {
    pub name: String,
    pub children: Vec<ColumnNameInfo>,
}

impl ColumnNameInfo {
    pub fn from_column(column: &OrcColumn) -> Self {
        Self {
            name: column.name().to_string(),
            children: column.children.iter().map(Self::from_column).collect(),
        }
    }
}

fn kind_of(data_type: &DataType) -> Result<TypeKind> {
    Ok(match data_type {
        DataType::Boolean => TypeKind::Boolean,
        DataType::Int32 => TypeKind::Int,
        DataType::Int64 => TypeKind::Long,
        DataType::Float32 => TypeKind::Float,
        DataType::Float64 => TypeKind::Double,
        DataType::Utf8 => TypeKind::String,
        DataType::Struct(_) => TypeKind::Struct,
        DataType::List(_) => TypeKind::List,
        other => {
            return Err(ColumnarError::not_supported(format!(
                "unsupported column type for stripe file: data_type={}",
                other
            )));
        }
    })
}

/// Flatten an arrow schema into preorder `Type` messages.
pub fn types_from_schema(schema: &Schema) -> Result<Vec<Type>> {
    let mut types = vec![Type {
        kind: Some(TypeKind::Struct as i32),
        subtypes: Vec::new(),
        field_names: Vec::new(),
        nullable: Some(false),
    }];
    let mut root_children = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        root_children.push(append_field(&mut types, field)?);
        types[0].field_names.push(field.name().clone());
    }
    types[0].subtypes = root_children;
    Ok(types)
}

fn append_field(types: &mut Vec<Type>, field: &Field) -> Result<u32> {
    let id = types.len() as u32;
    let kind = kind_of(field.data_type())?;
    types.push(Type {
        kind: Some(kind as i32),
        subtypes: Vec::new(),
        field_names: Vec::new(),
        nullable: Some(field.is_nullable()),
    });
    let (subtypes, names) = match field.data_type() {
        DataType::Struct(children) => {
            let mut ids = Vec::with_capacity(children.len());
            let mut names = Vec::with_capacity(children.len());
            for child in children {
                ids.push(append_field(types, child)?);
                names.push(child.name().clone());
            }
            (ids, names)
        }
        DataType::List(element) => (
            vec![append_field(types, element)?],
            vec![element.name().clone()],
        ),
        _ => (Vec::new(), Vec::new()),
    };
    let node = &mut types[id as usize];
    node.subtypes = subtypes;
    node.field_names = names;
    Ok(id)
}

/// Rebuild the arrow schema and column tree from footer types.
pub fn columns_from_types(types: &[Type]) -> Result<(SchemaRef, Vec<OrcColumn>)> {
    let root = types
        .first()
        .ok_or_else(|| ColumnarError::corruption("footer has no types"))?;
    if type_kind(root)? != TypeKind::Struct {
        return Err(ColumnarError::corruption("root type must be STRUCT"));
    }
    if root.subtypes.len() != root.field_names.len() {
        return Err(ColumnarError::corruption(format!(
            "root struct field name count mismatch: subtypes={}, names={}",
            root.subtypes.len(),
            root.field_names.len()
        )));
    }
    let mut columns = Vec::with_capacity(root.subtypes.len());
    for (child_id, name) in root.subtypes.iter().zip(&root.field_names) {
        columns.push(build_column(types, 0, *child_id, name, 0)?);
    }
    let schema = Schema::new(
        columns
            .iter()
            .map(|c| Arc::clone(&c.field))
            .collect::<Vec<_>>(),
    );
    Ok((Arc::new(schema), columns))
}

fn type_kind(t: &Type) -> Result<TypeKind> {
    let raw = t.kind.unwrap_or_default();
    TypeKind::try_from(raw)
        .map_err(|_| ColumnarError::corruption(format!("unknown type kind: kind={}", raw)))
}

fn build_column(
    types: &[Type],
    parent_id: u32,
    id: u32,
    name: &str,
    level: usize,
) -> Result<OrcColumn> {
    // Preorder ids: children always follow their parent.
    if id <= parent_id || id as usize >= types.len() {
        return Err(ColumnarError::corruption(format!(
            "invalid subtype id: parent={}, child={}, num_types={}",
            parent_id,
            id,
            types.len()
        )));
    }
    let t = &types[id as usize];
    let kind = type_kind(t)?;
    let nullable = t.nullable.unwrap_or(true);
    let (data_type, children) = match kind {
        TypeKind::Boolean => (DataType::Boolean, Vec::new()),
        TypeKind::Int => (DataType::Int32, Vec::new()),
        TypeKind::Long => (DataType::Int64, Vec::new()),
        TypeKind::Float => (DataType::Float32, Vec::new()),
        TypeKind::Double => (DataType::Float64, Vec::new()),
        TypeKind::String => (DataType::Utf8, Vec::new()),
        TypeKind::Struct => {
            if t.subtypes.len() != t.field_names.len() {
                return Err(ColumnarError::corruption(format!(
                    "struct field name count mismatch: column={}, subtypes={}, names={}",
                    id,
                    t.subtypes.len(),
                    t.field_names.len()
                )));
            }
            let mut children = Vec::with_capacity(t.subtypes.len());
            for (child_id, child_name) in t.subtypes.iter().zip(&t.field_names) {
                children.push(build_column(types, id, *child_id, child_name, level)?);
            }
            let fields: Fields = children.iter().map(|c| Arc::clone(&c.field)).collect();
            (DataType::Struct(fields), children)
        }
        TypeKind::List => {
            let [child_id] = t.subtypes.as_slice() else {
                return Err(ColumnarError::corruption(format!(
                    "list type must have one subtype: column={}, subtypes={}",
                    id,
                    t.subtypes.len()
                )));
            };
            let element_name = t
                .field_names
                .first()
                .map(String::as_str)
                .unwrap_or(DEFAULT_LIST_ELEMENT_NAME);
            let element = build_column(types, id, *child_id, element_name, level + 1)?;
            (DataType::List(Arc::clone(&element.field)), vec![element])
        }
        other => {
            return Err(ColumnarError::not_supported(format!(
                "unsupported column type in file: column={}, kind={:?}",
                id, other
            )));
        }
    };
    Ok(OrcColumn {
        id,
        kind,
        level,
        field: Arc::new(Field::new(name, data_type, nullable)),
        children,
    })
}
