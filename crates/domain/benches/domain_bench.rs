use chrono::Utc;
use common::CustomerId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Category, Money, Order, Product, ProductDetails};

fn make_products(count: usize) -> Vec<Product> {
    (0..count)
        .map(|i| {
            Product::create(
                ProductDetails {
                    name: format!("Bench Tee {i}"),
                    category: Category::TShirt,
                    size: "M".to_string(),
                    buying_price: Money::from_units(400),
                    selling_price: Money::from_cents(79_950),
                },
                1_000,
                Utc::now(),
            )
            .unwrap()
        })
        .collect()
}

fn bench_add_items(c: &mut Criterion) {
    let products = make_products(20);

    c.bench_function("domain/add_20_items", |b| {
        b.iter(|| {
            let mut order = Order::new(CustomerId::new(), Utc::now());
            for product in &products {
                order.add_item(product, 2, Utc::now()).unwrap();
            }
            order
        });
    });
}

fn bench_total_price(c: &mut Criterion) {
    let products = make_products(50);
    let mut order = Order::new(CustomerId::new(), Utc::now());
    for product in &products {
        order.add_item(product, 3, Utc::now()).unwrap();
    }

    c.bench_function("domain/total_price_50_lines", |b| {
        b.iter(|| order.total_price());
    });
}

fn bench_lifecycle(c: &mut Criterion) {
    let products = make_products(3);

    c.bench_function("domain/add_checkout_pay_deliver", |b| {
        b.iter(|| {
            let mut order = Order::new(CustomerId::new(), Utc::now());
            for product in &products {
                order.add_item(product, 1, Utc::now()).unwrap();
            }
            order.checkout(Utc::now()).unwrap();
            order.mark_paid(Utc::now()).unwrap();
            order.mark_delivered(Utc::now()).unwrap();
            order
        });
    });
}

criterion_group!(benches, bench_add_items, bench_total_price, bench_lifecycle);
criterion_main!(benches);
