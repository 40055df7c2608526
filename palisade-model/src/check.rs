/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Completion tracking for partial authorization progress.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::hash::Hash;

/** A row×column completion matrix.

Tracks which (resource, action) cells have been proven during one privilege
evaluation. Cells only move from unchecked to checked, except through the
explicit exclusion passes (`uncheck*`) that model denial overriding a prior
grant. Created per check, discarded with the result.
*/
#[derive(Clone, Debug)]
pub struct CheckTable<R, C> {
    rows: Vec<R>,
    row_positions: HashMap<R, usize>,
    columns: Vec<C>,
    column_positions: HashMap<C, usize>,
    cells: Vec<bool>,
    checked_count: usize,
}

impl<R, C> CheckTable<R, C>
where
    R: Clone + Eq + Hash,
    C: Clone + Eq + Hash,
{
    /// Create a blank table over the given rows and columns.
    pub fn new(
        rows: impl IntoIterator<Item = R>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        let rows: Vec<R> = rows.into_iter().collect();
        let columns: Vec<C> = columns.into_iter().collect();
        let row_positions = rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.clone(), position))
            .collect();
        let column_positions = columns
            .iter()
            .enumerate()
            .map(|(position, column)| (column.clone(), position))
            .collect();
        let cells = vec![false; rows.len() * columns.len()];
        Self {
            rows,
            row_positions,
            columns,
            column_positions,
            cells,
            checked_count: 0,
        }
    }

    fn cell_position(&self, row: &R, column: &C) -> usize {
        let row_position = *self
            .row_positions
            .get(row)
            .unwrap_or_else(|| panic!("Invalid row"));
        let column_position = *self
            .column_positions
            .get(column)
            .unwrap_or_else(|| panic!("Invalid column"));
        row_position * self.columns.len() + column_position
    }

    /// Mark the cell as checked. Return `true` iff the table is now
    /// complete.
    pub fn check(&mut self, row: &R, column: &C) -> bool {
        let position = self.cell_position(row, column);
        if !self.cells[position] {
            self.cells[position] = true;
            self.checked_count += 1;
        }
        self.is_complete()
    }

    /// Mark the cell as unchecked again.
    pub fn uncheck(&mut self, row: &R, column: &C) {
        let position = self.cell_position(row, column);
        if self.cells[position] {
            self.cells[position] = false;
            self.checked_count -= 1;
        }
    }

    /// Uncheck every cell of every row matched by `predicate`.
    pub fn uncheck_row_if<P: Fn(&R) -> bool>(&mut self, predicate: P) {
        for row_position in 0..self.rows.len() {
            if predicate(&self.rows[row_position]) {
                for column_position in 0..self.columns.len() {
                    let position = row_position * self.columns.len() + column_position;
                    if self.cells[position] {
                        self.cells[position] = false;
                        self.checked_count -= 1;
                    }
                }
            }
        }
    }

    /// Return `true` if the cell is checked.
    pub fn is_checked(&self, row: &R, column: &C) -> bool {
        self.cells[self.cell_position(row, column)]
    }

    /// Return `true` if every cell is checked.
    pub fn is_complete(&self) -> bool {
        self.checked_count == self.cells.len()
    }

    /// Return `true` if no cell is checked.
    pub fn is_blank(&self) -> bool {
        self.checked_count == 0
    }

    /// Return `true` if every cell of the row is checked.
    pub fn is_row_complete(&self, row: &R) -> bool {
        let row_position = *self
            .row_positions
            .get(row)
            .unwrap_or_else(|| panic!("Invalid row"));
        (0..self.columns.len())
            .all(|column_position| self.cells[row_position * self.columns.len() + column_position])
    }

    /// Return the rows of the table in insertion order.
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Return the columns of the table in insertion order.
    pub fn columns(&self) -> &[C] {
        &self.columns
    }

    /// Return all rows whose every cell is checked.
    pub fn complete_rows(&self) -> Vec<&R> {
        self.rows
            .iter()
            .filter(|row| self.is_row_complete(row))
            .collect()
    }

    /// Return all rows with at least one unchecked cell.
    pub fn incomplete_rows(&self) -> Vec<&R> {
        self.rows
            .iter()
            .filter(|row| !self.is_row_complete(row))
            .collect()
    }

    /// Return the columns that are unchecked for the given row.
    pub fn unchecked_columns(&self, row: &R) -> Vec<&C> {
        let row_position = *self
            .row_positions
            .get(row)
            .unwrap_or_else(|| panic!("Invalid row"));
        self.columns
            .iter()
            .enumerate()
            .filter(|(column_position, _)| {
                !self.cells[row_position * self.columns.len() + column_position]
            })
            .map(|(_, column)| column)
            .collect()
    }

    /// Return the rows that are unchecked for the given column.
    pub fn unchecked_rows(&self, column: &C) -> Vec<&R> {
        let column_position = *self
            .column_positions
            .get(column)
            .unwrap_or_else(|| panic!("Invalid column"));
        self.rows
            .iter()
            .enumerate()
            .filter(|(row_position, _)| {
                !self.cells[row_position * self.columns.len() + column_position]
            })
            .map(|(_, row)| row)
            .collect()
    }

    /// Return the rows that are checked for the given column.
    pub fn checked_rows(&self, column: &C) -> Vec<&R> {
        let column_position = *self
            .column_positions
            .get(column)
            .unwrap_or_else(|| panic!("Invalid column"));
        self.rows
            .iter()
            .enumerate()
            .filter(|(row_position, _)| {
                self.cells[row_position * self.columns.len() + column_position]
            })
            .map(|(_, row)| row)
            .collect()
    }

    /// Map the rows into another type, keeping the checked cells.
    pub fn map_rows<R2, F>(&self, map: F) -> CheckTable<R2, C>
    where
        R2: Clone + Eq + Hash,
        F: Fn(&R) -> R2,
    {
        let rows: Vec<R2> = self.rows.iter().map(map).collect();
        let row_positions = rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.clone(), position))
            .collect();
        CheckTable {
            rows,
            row_positions,
            columns: self.columns.clone(),
            column_positions: self.column_positions.clone(),
            cells: self.cells.clone(),
            checked_count: self.checked_count,
        }
    }
}

impl<R, C> CheckTable<R, C>
where
    R: Clone + Eq + Hash + fmt::Display,
    C: Clone + Eq + Hash + fmt::Display,
{
    /// Render the table with the given cell indicators.
    pub fn to_table_string(&self, checked_indicator: &str, unchecked_indicator: &str) -> String {
        let mut result = String::new();
        for (row_position, row) in self.rows.iter().enumerate() {
            let _ = write!(result, "{row}:");
            for (column_position, column) in self.columns.iter().enumerate() {
                let indicator = if self.cells[row_position * self.columns.len() + column_position] {
                    checked_indicator
                } else {
                    unchecked_indicator
                };
                let _ = write!(result, " {column}={indicator}");
            }
            result.push('\n');
        }
        result
    }
}

/** A single dimension completion list.

The degenerate one-column variant of [CheckTable], used where only a set
of required items has to be proven.
*/
#[derive(Clone, Debug)]
pub struct CheckList<E> {
    elements: Vec<E>,
    positions: HashMap<E, usize>,
    checked: Vec<bool>,
    checked_count: usize,
}

impl<E> CheckList<E>
where
    E: Clone + Eq + Hash,
{
    /// Create a blank list over the given elements.
    pub fn new(elements: impl IntoIterator<Item = E>) -> Self {
        let elements: Vec<E> = elements.into_iter().collect();
        let positions = elements
            .iter()
            .enumerate()
            .map(|(position, element)| (element.clone(), position))
            .collect();
        let checked = vec![false; elements.len()];
        Self {
            elements,
            positions,
            checked,
            checked_count: 0,
        }
    }

    /// Mark the element as checked. Return `true` iff the list is now
    /// complete.
    pub fn check(&mut self, element: &E) -> bool {
        let position = *self
            .positions
            .get(element)
            .unwrap_or_else(|| panic!("Invalid element"));
        if !self.checked[position] {
            self.checked[position] = true;
            self.checked_count += 1;
        }
        self.is_complete()
    }

    /// Return `true` if the element is checked.
    pub fn is_checked(&self, element: &E) -> bool {
        self.positions
            .get(element)
            .is_some_and(|position| self.checked[*position])
    }

    /// Return `true` if every element is checked.
    pub fn is_complete(&self) -> bool {
        self.checked_count == self.elements.len()
    }

    /// Return `true` if no element is checked.
    pub fn is_blank(&self) -> bool {
        self.checked_count == 0
    }

    /// Return the elements that are still unchecked.
    pub fn unchecked_elements(&self) -> Vec<&E> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(position, _)| !self.checked[*position])
            .map(|(_, element)| element)
            .collect()
    }
}
