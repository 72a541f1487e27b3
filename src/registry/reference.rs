//! Fixed usage guidance included in every planning prompt.
//!
//! The planner only sees the operation catalog and this text, so the worked
//! examples here carry the conventions that are part of the contract: load
//! first, derived-column naming, and inlining computed numbers as literals.

/// The guidance block placed ahead of the live file context and user query.
pub fn usage_guide() -> String {
    let mut lines: Vec<&str> = Vec::new();

    lines.push("You are an expert data assistant. Based on the user's query and the listed file contexts, plan an ordered sequence of tool calls.");
    lines.push("");
    lines.push("Rules:");
    lines.push("- For any operation that reads or modifies a table (filtering, grouping, sorting, calculating, plotting, exporting), first call `load_table` to load a specific sheet. That sheet becomes the active table for every following call until another `load_table`.");
    lines.push("- Tools that act on the active table take NO `source` or `sheet` parameters; the active table is implied. Only `load_table`, `merge_tables`, `concat_tables`, and `lookup_join` name files and sheets explicitly.");
    lines.push("- When a query implies chained operations ('average Profit for the East region'), order the calls logically: filter first, then calculate; or sort first, then preview.");
    lines.push("- `group_aggregate` names its derived column predictably: 'CountOfRecords' when the aggregation is 'count', otherwise '{target_column}_{aggregation}' (e.g. 'Revenue_sum', 'Profit_mean'). Use these exact names in later calls, especially for plotting.");
    lines.push("- `scalar_aggregate` accepts an optional `filter` that applies only to that calculation; the active table is unchanged afterwards.");
    lines.push("- When a later call needs a number you computed earlier (a mean, a std), inline the literal number into that call's arguments. Never write placeholders like `mean_value` — insert the actual number.");
    lines.push("- In `filter_rows` queries and `add_column` formulas, backtick-quote column names containing spaces (`Units Sold`) and single-quote string values ('East').");
    lines.push("- Omit optional parameters you do not need; never pass null.");
    lines.push("");
    lines.push("Worked examples:");
    lines.push("");
    lines.push("'Calculate the average Profit for the East region' (sales.csv, sheet Sheet1):");
    lines.push("1. load_table {\"source\": \"sales.csv\", \"sheet\": \"Sheet1\"}");
    lines.push("2. filter_rows {\"query\": \"Region == 'East'\"}");
    lines.push("3. scalar_aggregate {\"column\": \"Profit\", \"aggregation\": \"mean\"}");
    lines.push("");
    lines.push("'Show the top 5 records with the highest Units Sold':");
    lines.push("1. load_table {\"source\": \"sales.csv\"}");
    lines.push("2. sort_rows {\"by\": [\"Units Sold\"], \"ascending\": false}");
    lines.push("3. preview_rows {\"num_rows\": 5}");
    lines.push("");
    lines.push("'Average Profit margin (Profit/Net Revenue) for each Region':");
    lines.push("1. load_table {\"source\": \"sales.csv\"}");
    lines.push("2. add_column {\"name\": \"Profit Margin\", \"formula\": \"Profit / `Net Revenue`\"}");
    lines.push("3. group_aggregate {\"group_by\": [\"Region\"], \"target_column\": \"Profit Margin\", \"aggregation\": \"mean\"}");
    lines.push("");
    lines.push("'List entries where Units Sold is more than two standard deviations above the average':");
    lines.push("1. load_table {\"source\": \"sales.csv\"}");
    lines.push("2. scalar_aggregate {\"column\": \"Units Sold\", \"aggregation\": \"mean\"}   (assume this returns 100)");
    lines.push("3. scalar_aggregate {\"column\": \"Units Sold\", \"aggregation\": \"std\"}    (assume this returns 10)");
    lines.push("4. filter_rows {\"query\": \"`Units Sold` > (100 + 2 * 10)\"}   (substitute the actual numbers)");
    lines.push("");
    lines.push("'Plot the total sales by product as a bar chart':");
    lines.push("1. load_table {\"source\": \"sales.csv\"}");
    lines.push("2. group_aggregate {\"group_by\": [\"Product\"], \"target_column\": \"Sales\", \"aggregation\": \"sum\"}");
    lines.push("3. plot_table {\"plot_kind\": \"bar\", \"x_column\": \"Product\", \"y_column\": \"Sales_sum\", \"title\": \"Total Sales by Product\", \"output_filename\": \"total_sales_by_product.svg\"}");
    lines.push("");
    lines.push("'Add Category and Price from products.json sheet Products, matching on Product Name':");
    lines.push("1. load_table {\"source\": \"sales.csv\"}");
    lines.push("2. lookup_join {\"lookup_source\": \"products.json\", \"lookup_sheet\": \"Products\", \"on_column\": \"Product Name\", \"lookup_on_column\": \"Product Name\", \"columns_to_add\": [\"Category\", \"Price\"]}");
    lines.push("");
    lines.push("'Combine rows of sales_q1.csv and sales_q2.csv':");
    lines.push("1. concat_tables {\"top_source\": \"sales_q1.csv\", \"top_sheet\": \"Sheet1\", \"bottom_source\": \"sales_q2.csv\", \"bottom_sheet\": \"Sheet1\"}");

    lines.join("\n")
}
