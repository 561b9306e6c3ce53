//! Order entry form validation.
//!
//! Everything here runs before any lookup: a form that fails validation never
//! reaches the resolvers or the commit call.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nursery_parties::{AddressId, CustomerId};
use nursery_products::{ProductGroupId, ProductId};

const MAX_NOTES_LEN: usize = 2000;
const MAX_DESCRIPTION_LEN: usize = 500;
/// Caps keep every line and order total well inside `Decimal` range.
const MAX_LINE_QUANTITY: i64 = 1_000_000;
const MAX_UNIT_PRICE: i64 = 1_000_000;

/// Raw order submission, as sent by the order entry page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderForm {
    pub customer_id: String,
    #[serde(default)]
    pub lines: Vec<OrderLineForm>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub ship_to_address_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineForm {
    pub product_id: Option<String>,
    pub variety: Option<String>,
    pub size: Option<String>,
    pub product_group_id: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub description: Option<String>,
}

/// How a line names what is being ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineRef {
    Product { product_id: ProductId },
    Label { variety: String, size: String },
    /// "Mix" line: any member of the group.
    Group { product_group_id: ProductGroupId },
}

impl core::fmt::Display for LineRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LineRef::Product { product_id } => write!(f, "product '{product_id}'"),
            LineRef::Label { variety, size } => {
                write!(f, "variety '{}' size '{}'", variety.trim(), size.trim())
            }
            LineRef::Group { product_group_id } => write!(f, "product group '{product_group_id}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    /// 1-based position in the submitted form.
    pub line_no: u32,
    pub reference: LineRef,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<LineRequest>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub ship_to_address_id: Option<AddressId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// All field problems found in one form.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Invalid form data")]
pub struct FormErrors {
    pub issues: Vec<FieldIssue>,
}

impl OrderForm {
    pub fn validate(&self) -> Result<ValidatedOrder, FormErrors> {
        let mut issues = Vec::new();
        let mut issue = |field: String, message: &str| {
            issues.push(FieldIssue {
                field,
                message: message.to_string(),
            })
        };

        let customer_id = CustomerId::parse(&self.customer_id).ok();
        if customer_id.is_none() {
            issue("customerId".into(), "must be a UUID");
        }

        let ship_to_address_id = match self.ship_to_address_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = AddressId::parse(raw).ok();
                if parsed.is_none() {
                    issue("shipToAddressId".into(), "must be a UUID");
                }
                parsed
            }
        };

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
            issue("notes".into(), "is too long");
        }

        if self.lines.is_empty() {
            issue("lines".into(), "at least one line is required");
        }

        let mut lines = Vec::with_capacity(self.lines.len());
        for (idx, line) in self.lines.iter().enumerate() {
            let field = |name: &str| format!("lines[{idx}].{name}");

            if line.quantity <= 0 {
                issue(field("quantity"), "must be positive");
            } else if line.quantity > MAX_LINE_QUANTITY {
                issue(field("quantity"), "must not exceed 1000000");
            }
            match line.unit_price {
                Some(p) if p.is_sign_negative() => {
                    issue(field("unitPrice"), "must not be negative")
                }
                Some(p) if p > Decimal::from(MAX_UNIT_PRICE) => {
                    issue(field("unitPrice"), "must not exceed 1000000")
                }
                _ => {}
            }
            if line
                .vat_rate
                .is_some_and(|r| r.is_sign_negative() || r > Decimal::ONE_HUNDRED)
            {
                issue(field("vatRate"), "must be between 0 and 100");
            }
            let description = line
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            if description
                .as_ref()
                .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
            {
                issue(field("description"), "is too long");
            }

            let reference = match line_reference(line) {
                Ok(r) => Some(r),
                Err((name, message)) => {
                    issue(field(name), message);
                    None
                }
            };

            if let Some(reference) = reference {
                lines.push(LineRequest {
                    line_no: idx as u32 + 1,
                    reference,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    vat_rate: line.vat_rate,
                    description,
                });
            }
        }

        match customer_id {
            Some(customer_id) if issues.is_empty() => Ok(ValidatedOrder {
                customer_id,
                lines,
                delivery_date: self.delivery_date,
                notes,
                ship_to_address_id,
            }),
            _ => Err(FormErrors { issues }),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Group id wins over product id, which wins over a label.
fn line_reference(line: &OrderLineForm) -> Result<LineRef, (&'static str, &'static str)> {
    if let Some(raw) = non_blank(&line.product_group_id) {
        return ProductGroupId::parse(raw)
            .map(|product_group_id| LineRef::Group { product_group_id })
            .map_err(|_| ("productGroupId", "must be a UUID"));
    }
    if let Some(raw) = non_blank(&line.product_id) {
        return ProductId::parse(raw)
            .map(|product_id| LineRef::Product { product_id })
            .map_err(|_| ("productId", "must be a UUID"));
    }
    match (non_blank(&line.variety), non_blank(&line.size)) {
        (Some(variety), Some(size)) => Ok(LineRef::Label {
            variety: variety.to_string(),
            size: size.to_string(),
        }),
        (Some(_), None) => Err(("size", "is required with variety")),
        (None, Some(_)) => Err(("variety", "is required with size")),
        (None, None) => Err((
            "productId",
            "a product, product group, or variety and size is required",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: &str, quantity: i64) -> OrderLineForm {
        OrderLineForm {
            product_id: Some(product_id.to_string()),
            quantity,
            ..OrderLineForm::default()
        }
    }

    fn form(lines: Vec<OrderLineForm>) -> OrderForm {
        OrderForm {
            customer_id: CustomerId::new().to_string(),
            lines,
            ..OrderForm::default()
        }
    }

    #[test]
    fn malformed_customer_id_is_invalid_form_data() {
        let mut f = form(vec![line(&ProductId::new().to_string(), 1)]);
        f.customer_id = "cust-1".to_string();

        let err = f.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid form data");
        assert_eq!(err.issues[0].field, "customerId");
    }

    #[test]
    fn valid_form_produces_typed_lines_in_order() {
        let product = ProductId::new();
        let group = ProductGroupId::new();
        let f = form(vec![
            OrderLineForm {
                unit_price: Some(dec!(5.00)),
                ..line(&product.to_string(), 10)
            },
            OrderLineForm {
                variety: Some(" Lavender ".into()),
                size: Some("2L".into()),
                quantity: 4,
                ..OrderLineForm::default()
            },
            OrderLineForm {
                product_group_id: Some(group.to_string()),
                quantity: 20,
                ..OrderLineForm::default()
            },
        ]);

        let validated = f.validate().unwrap();
        assert_eq!(validated.lines.len(), 3);
        assert_eq!(validated.lines[0].line_no, 1);
        assert_eq!(validated.lines[0].reference, LineRef::Product { product_id: product });
        assert_eq!(validated.lines[0].unit_price, Some(dec!(5.00)));
        assert_eq!(
            validated.lines[1].reference,
            LineRef::Label {
                variety: "Lavender".into(),
                size: "2L".into()
            }
        );
        assert_eq!(
            validated.lines[2].reference,
            LineRef::Group {
                product_group_id: group
            }
        );
    }

    #[test]
    fn collects_every_line_issue() {
        let f = form(vec![
            line(&ProductId::new().to_string(), 0),
            OrderLineForm {
                variety: Some("Hebe".into()),
                quantity: 1,
                ..OrderLineForm::default()
            },
            OrderLineForm {
                vat_rate: Some(dec!(120)),
                ..line("prod-1", 2)
            },
        ]);

        let err = f.validate().unwrap_err();
        let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "lines[0].quantity",
                "lines[1].size",
                "lines[2].vatRate",
                "lines[2].productId"
            ]
        );
    }

    #[test]
    fn oversized_quantity_and_price_are_field_issues() {
        let f = form(vec![
            OrderLineForm {
                unit_price: Some(dec!(1000000000000)),
                ..line(&ProductId::new().to_string(), i64::MAX)
            },
            OrderLineForm {
                unit_price: Some(dec!(1000000)),
                ..line(&ProductId::new().to_string(), 1_000_000)
            },
        ]);

        let err = f.validate().unwrap_err();
        let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["lines[0].quantity", "lines[0].unitPrice"]);
        assert_eq!(err.issues[0].message, "must not exceed 1000000");
    }

    #[test]
    fn empty_order_is_rejected() {
        let err = form(vec![]).validate().unwrap_err();
        assert_eq!(err.issues[0].field, "lines");
    }

    #[test]
    fn blank_optional_fields_are_dropped() {
        let mut f = form(vec![line(&ProductId::new().to_string(), 1)]);
        f.notes = Some("   ".into());
        f.ship_to_address_id = Some("".into());
        let validated = f.validate().unwrap();
        assert_eq!(validated.notes, None);
        assert_eq!(validated.ship_to_address_id, None);
    }

    #[test]
    fn form_deserializes_from_camel_case_json() {
        let product = ProductId::new();
        let json = serde_json::json!({
            "customerId": CustomerId::new().to_string(),
            "lines": [{ "productId": product.to_string(), "quantity": 3, "unitPrice": "2.50" }],
            "deliveryDate": "2026-11-02"
        });
        let f: OrderForm = serde_json::from_value(json).unwrap();
        let validated = f.validate().unwrap();
        assert_eq!(validated.lines[0].unit_price, Some(dec!(2.50)));
        assert_eq!(
            validated.delivery_date,
            NaiveDate::from_ymd_opt(2026, 11, 2)
        );
    }
}
